use crate::auth::{check_owner, Authorizer};
use crate::{
    builtin_procedures, ArgMode, CodeInfo, Directive, Error, Lang, ProcedureInfo, SpType,
    ValidatedProcedure,
};
use pl_session::{DbType, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// ProcedureRow is the catalog row of a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureRow {
    pub unique_name: String,
    pub name: String,
    pub pkg_name: Option<String>,
    pub sp_type: SpType,
    pub return_type: DbType,
    pub arg_count: usize,
    pub lang: Lang,
    pub target_class: String,
    pub target_method: String,
    pub owner: String,
    pub directive: Directive,
    pub is_system_generated: bool,
    pub comment: String,
}

/// ArgumentRow is the catalog row of one stored procedure argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentRow {
    /// Unique name of the procedure of this argument.
    pub sp_of: String,
    pub index: usize,
    pub name: String,
    pub ty: DbType,
    pub mode: ArgMode,
    pub default_value: Option<Value>,
    pub is_optional: bool,
    pub is_system_generated: bool,
    pub comment: String,
}

/// CatalogRecord is a row of one of the stored procedure catalog tables.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRecord {
    Procedure(ProcedureRow),
    Argument(ArgumentRow),
    Code(CodeInfo),
}

impl CatalogRecord {
    fn key(&self) -> RecordKey {
        match self {
            Self::Procedure(row) => RecordKey::Procedure(row.unique_name.clone()),
            Self::Argument(row) => RecordKey::Argument(row.sp_of.clone(), row.index),
            Self::Code(code) => RecordKey::Code(code.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RecordKey {
    Procedure(String),
    Argument(String, usize),
    Code(String),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Procedure(name) => write!(f, "stored procedure {name}"),
            Self::Argument(name, index) => write!(f, "argument {index} of {name}"),
            Self::Code(name) => write!(f, "stored procedure code {name}"),
        }
    }
}

#[derive(Default)]
struct Tables {
    records: BTreeMap<RecordKey, CatalogRecord>,
    // Grantees of each procedure, by unique name.
    privileges: BTreeMap<String, BTreeSet<String>>,
}

/// MemoryCatalog is an in-memory stored procedure catalog.
pub struct MemoryCatalog {
    authorizer: Arc<dyn Authorizer>,
    tables: Mutex<Tables>,
}

impl MemoryCatalog {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            authorizer,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Begin a group of changes, which are rolled back
    /// unless the Savepoint is committed.
    pub fn savepoint(&self) -> Savepoint<'_> {
        Savepoint {
            tables: self.tables.lock().unwrap(),
            undo: Vec::new(),
            committed: false,
        }
    }

    /// Add the built-in procedures, returning the number added.
    pub fn install_builtins(&self) -> Result<usize, Error> {
        let mut savepoint = self.savepoint();
        let mut count = 0;

        for info in builtin_procedures() {
            savepoint.add_stored_procedure(info.validate()?)?;
            count += 1;
        }
        savepoint.commit();

        tracing::debug!(%count, "installed built-in stored procedures");
        Ok(count)
    }

    pub fn add_stored_procedure(&self, current_user: &str, info: ProcedureInfo) -> Result<(), Error> {
        self.create_procedure(current_user, info, None)
    }

    /// Add a stored procedure and, for PL/CSQL procedures, its code.
    /// Either every row is added, or none are.
    pub fn create_procedure(
        &self,
        current_user: &str,
        info: ProcedureInfo,
        code: Option<CodeInfo>,
    ) -> Result<(), Error> {
        if !check_owner(self.authorizer(), &info.owner, current_user) {
            return Err(Error::OwnerCheck {
                user: current_user.to_string(),
                owner: info.owner,
            });
        }
        let validated = info.validate()?;
        let unique_name = validated.info().unique_name.clone();

        let mut savepoint = self.savepoint();
        savepoint.add_stored_procedure(validated)?;
        if let Some(code) = code {
            savepoint.add_stored_procedure_code(code)?;
        }
        savepoint.commit();

        tracing::debug!(%unique_name, "added stored procedure");
        Ok(())
    }

    pub fn add_stored_procedure_code(&self, code: CodeInfo) -> Result<(), Error> {
        let mut savepoint = self.savepoint();
        savepoint.add_stored_procedure_code(code)?;
        savepoint.commit();
        Ok(())
    }

    /// Remove a stored procedure with its arguments, code and privileges.
    pub fn drop_procedure(&self, current_user: &str, unique_name: &str) -> Result<(), Error> {
        let mut savepoint = self.savepoint();

        let row = savepoint
            .procedure(unique_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(unique_name.to_string()))?;

        if !check_owner(self.authorizer(), &row.owner, current_user) {
            return Err(Error::OwnerCheck {
                user: current_user.to_string(),
                owner: row.owner,
            });
        }

        savepoint.remove(&RecordKey::Procedure(row.unique_name.clone()));
        for index in 0..row.arg_count {
            savepoint.remove(&RecordKey::Argument(row.unique_name.clone(), index));
        }
        if row.lang == Lang::PlCsql {
            savepoint.remove(&RecordKey::Code(row.target_class.clone()));
        }
        savepoint.revoke_all_privileges(unique_name);
        savepoint.commit();

        Ok(())
    }

    /// Grant `grantee` the privilege to execute `unique_name`.
    pub fn grant(&self, unique_name: &str, grantee: &str) -> Result<(), Error> {
        let mut savepoint = self.savepoint();
        if savepoint.procedure(unique_name).is_none() {
            return Err(Error::NotFound(unique_name.to_string()));
        }
        savepoint.grant(unique_name, grantee);
        savepoint.commit();
        Ok(())
    }

    pub fn privileges(&self, unique_name: &str) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .privileges
            .get(unique_name)
            .map(|grantees| grantees.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn procedure(&self, unique_name: &str) -> Option<ProcedureRow> {
        match self
            .tables
            .lock()
            .unwrap()
            .records
            .get(&RecordKey::Procedure(unique_name.to_string()))
        {
            Some(CatalogRecord::Procedure(row)) => Some(row.clone()),
            _ => None,
        }
    }

    /// Arguments of `unique_name`, in order.
    pub fn arguments(&self, unique_name: &str) -> Vec<ArgumentRow> {
        let tables = self.tables.lock().unwrap();
        let start = RecordKey::Argument(unique_name.to_string(), 0);

        tables
            .records
            .range(start..)
            .map_while(|(_, record)| match record {
                CatalogRecord::Argument(row) if row.sp_of == unique_name => Some(row.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn code(&self, name: &str) -> Option<CodeInfo> {
        match self
            .tables
            .lock()
            .unwrap()
            .records
            .get(&RecordKey::Code(name.to_string()))
        {
            Some(CatalogRecord::Code(code)) => Some(code.clone()),
            _ => None,
        }
    }

    /// Unique names of all stored procedures.
    pub fn procedure_names(&self) -> Vec<String> {
        self.tables
            .lock()
            .unwrap()
            .records
            .keys()
            .filter_map(|key| match key {
                RecordKey::Procedure(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

enum Undo {
    Remove(RecordKey),
    Restore(CatalogRecord),
    Privileges(String, Option<BTreeSet<String>>),
}

/// Savepoint holds the catalog exclusively while a group of changes is made.
/// Dropping it without calling `commit` rolls back every change.
pub struct Savepoint<'c> {
    tables: MutexGuard<'c, Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'c> Savepoint<'c> {
    /// Insert a new record, failing if its key is already present.
    pub fn insert(&mut self, record: CatalogRecord) -> Result<(), Error> {
        let key = record.key();
        if self.tables.records.contains_key(&key) {
            return Err(Error::DuplicateName(key.to_string()));
        }
        self.tables.records.insert(key.clone(), record);
        self.undo.push(Undo::Remove(key));
        Ok(())
    }

    fn replace(&mut self, record: CatalogRecord) -> Result<(), Error> {
        let key = record.key();
        match self.tables.records.insert(key.clone(), record) {
            Some(prior) => {
                self.undo.push(Undo::Restore(prior));
                Ok(())
            }
            None => {
                self.tables.records.remove(&key);
                Err(Error::NotFound(key.to_string()))
            }
        }
    }

    fn remove(&mut self, key: &RecordKey) -> Option<CatalogRecord> {
        let prior = self.tables.records.remove(key)?;
        self.undo.push(Undo::Restore(prior.clone()));
        Some(prior)
    }

    pub fn procedure(&self, unique_name: &str) -> Option<&ProcedureRow> {
        match self
            .tables
            .records
            .get(&RecordKey::Procedure(unique_name.to_string()))
        {
            Some(CatalogRecord::Procedure(row)) => Some(row),
            _ => None,
        }
    }

    /// Add the rows of a validated procedure and its arguments.
    pub fn add_stored_procedure(&mut self, procedure: ValidatedProcedure) -> Result<(), Error> {
        let info = procedure.into_inner();

        self.insert(CatalogRecord::Procedure(ProcedureRow {
            unique_name: info.unique_name.clone(),
            name: info.name,
            pkg_name: info.pkg_name,
            sp_type: info.sp_type,
            return_type: info.return_type,
            arg_count: info.args.len(),
            lang: info.lang,
            target_class: info.target_class,
            target_method: info.target_method,
            owner: info.owner,
            directive: info.directive,
            is_system_generated: info.is_system_generated,
            comment: info.comment,
        }))?;

        for arg in info.args {
            self.insert(CatalogRecord::Argument(ArgumentRow {
                sp_of: info.unique_name.clone(),
                index: arg.index,
                name: arg.name,
                ty: arg.ty,
                mode: arg.mode,
                default_value: arg.default_value,
                is_optional: arg.is_optional,
                is_system_generated: arg.is_system_generated,
                comment: arg.comment,
            }))?;
        }
        Ok(())
    }

    pub fn add_stored_procedure_code(&mut self, code: CodeInfo) -> Result<(), Error> {
        self.insert(CatalogRecord::Code(code))
    }

    /// Update the owner and object code of the code row `name`.
    pub fn edit_stored_procedure_code(
        &mut self,
        name: &str,
        owner: Option<&str>,
        object_code: Option<&str>,
    ) -> Result<(), Error> {
        let Some(CatalogRecord::Code(code)) =
            self.tables.records.get(&RecordKey::Code(name.to_string()))
        else {
            return Err(Error::NotFound(RecordKey::Code(name.to_string()).to_string()));
        };
        let mut code = code.clone();

        if let Some(owner) = owner {
            code.owner = owner.to_string();
        }
        if let Some(object_code) = object_code {
            code.object_code = object_code.to_string();
        }
        self.replace(CatalogRecord::Code(code))
    }

    /// Move procedure `from`, with its arguments, to unique name `to`
    /// under `owner`.
    pub fn rename_procedure(&mut self, from: &str, to: &str, owner: &str) -> Result<(), Error> {
        let Some(CatalogRecord::Procedure(mut row)) =
            self.remove(&RecordKey::Procedure(from.to_string()))
        else {
            return Err(Error::NotFound(RecordKey::Procedure(from.to_string()).to_string()));
        };
        row.unique_name = to.to_string();
        row.owner = owner.to_string();
        let arg_count = row.arg_count;
        self.insert(CatalogRecord::Procedure(row))?;

        for index in 0..arg_count {
            if let Some(CatalogRecord::Argument(mut arg)) =
                self.remove(&RecordKey::Argument(from.to_string(), index))
            {
                arg.sp_of = to.to_string();
                self.insert(CatalogRecord::Argument(arg))?;
            }
        }
        Ok(())
    }

    pub fn grant(&mut self, unique_name: &str, grantee: &str) {
        let prior = self.tables.privileges.get(unique_name).cloned();
        self.undo
            .push(Undo::Privileges(unique_name.to_string(), prior));

        self.tables
            .privileges
            .entry(unique_name.to_string())
            .or_default()
            .insert(grantee.to_string());
    }

    /// Revoke every privilege granted on `unique_name`,
    /// returning the number revoked.
    pub fn revoke_all_privileges(&mut self, unique_name: &str) -> usize {
        let Some(prior) = self.tables.privileges.remove(unique_name) else {
            return 0;
        };
        let count = prior.len();
        self.undo
            .push(Undo::Privileges(unique_name.to_string(), Some(prior)));
        count
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        let changes = self.undo.len();

        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Remove(key) => {
                    self.tables.records.remove(&key);
                }
                Undo::Restore(record) => {
                    self.tables.records.insert(record.key(), record);
                }
                Undo::Privileges(name, Some(grantees)) => {
                    self.tables.privileges.insert(name, grantees);
                }
                Undo::Privileges(name, None) => {
                    self.tables.privileges.remove(&name);
                }
            }
        }
        tracing::debug!(%changes, "rolled back catalog savepoint");
    }
}

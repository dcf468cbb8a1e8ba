use crate::Error;
use pl_session::{DbType, Value};

/// Maximum length in bytes of a catalog identifier.
pub const MAX_IDENTIFIER_LENGTH: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpType {
    Procedure = 1,
    Function = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    PlCsql = 0,
    Java = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgMode {
    In = 1,
    Out = 2,
    InOut = 3,
}

/// Directive selects whose rights a procedure executes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Directive {
    RightsOwner = 0,
    RightsCaller = 1,
}

/// ArgumentInfo describes one argument of a stored procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentInfo {
    pub name: String,
    /// Position of the argument, assigned on validation.
    pub index: usize,
    pub ty: DbType,
    pub mode: ArgMode,
    pub default_value: Option<Value>,
    pub is_optional: bool,
    pub is_system_generated: bool,
    pub comment: String,
}

impl ArgumentInfo {
    pub fn new(name: &str, ty: DbType, mode: ArgMode) -> Self {
        Self {
            name: name.to_string(),
            index: 0,
            ty,
            mode,
            default_value: None,
            is_optional: false,
            is_system_generated: false,
            comment: String::new(),
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self.is_optional = true;
        self
    }
}

/// ProcedureInfo describes a stored procedure to be added to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureInfo {
    /// Owner-qualified name, as "<owner>.<name>".
    pub unique_name: String,
    pub name: String,
    pub pkg_name: Option<String>,
    pub sp_type: SpType,
    /// Null for procedures without a return value.
    pub return_type: DbType,
    pub args: Vec<ArgumentInfo>,
    pub lang: Lang,
    pub target_class: String,
    pub target_method: String,
    pub owner: String,
    pub directive: Directive,
    pub is_system_generated: bool,
    pub comment: String,
}

impl ProcedureInfo {
    /// Validate argument and return types, lower-case the package name,
    /// and number the arguments in order.
    pub fn validate(mut self) -> Result<ValidatedProcedure, Error> {
        match check_return_type_supported(self.return_type) {
            // Tolerated here, and rejected when the procedure is called.
            Ok(()) | Err(Error::CannotReturnResultSet) => (),
            Err(err) => return Err(err),
        }

        for (index, arg) in self.args.iter_mut().enumerate() {
            check_param_type_supported(arg).map_err(|err| {
                tracing::debug!(procedure = %self.unique_name, %err, "rejected stored procedure argument");
                err
            })?;
            arg.index = index;
        }
        self.pkg_name = self.pkg_name.as_deref().map(normalize_name);

        Ok(ValidatedProcedure(self))
    }
}

/// ValidatedProcedure is a ProcedureInfo which may be added to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProcedure(ProcedureInfo);

impl ValidatedProcedure {
    pub fn info(&self) -> &ProcedureInfo {
        &self.0
    }

    pub fn into_inner(self) -> ProcedureInfo {
        self.0
    }
}

/// CodeInfo is the source and compiled object code of a PL/CSQL procedure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeInfo {
    /// Name of the generated class.
    pub name: String,
    pub owner: String,
    pub created_time: String,
    pub source_type: i32,
    pub source_code: String,
    pub object_type: i32,
    pub object_code: String,
}

/// Check that an argument's type is supported for its mode.
/// Result sets may only be output arguments.
pub fn check_param_type_supported(arg: &ArgumentInfo) -> Result<(), Error> {
    match arg.ty {
        ty if is_scalar(ty) => Ok(()),
        DbType::ResultSet if arg.mode == ArgMode::Out => Ok(()),
        DbType::ResultSet => Err(Error::CannotInputResultSet {
            name: arg.name.clone(),
        }),
        ty => Err(Error::UnsupportedArgType {
            name: arg.name.clone(),
            ty,
        }),
    }
}

/// Check that `ty` may be returned. Null is the type of procedures
/// which return nothing.
pub fn check_return_type_supported(ty: DbType) -> Result<(), Error> {
    match ty {
        DbType::Null => Ok(()),
        ty if is_scalar(ty) => Ok(()),
        DbType::ResultSet => Err(Error::CannotReturnResultSet),
        ty => Err(Error::UnsupportedReturnType(ty)),
    }
}

fn is_scalar(ty: DbType) -> bool {
    matches!(
        ty,
        DbType::Integer
            | DbType::Float
            | DbType::Double
            | DbType::String
            | DbType::Object
            | DbType::Set
            | DbType::Multiset
            | DbType::Sequence
            | DbType::Time
            | DbType::Timestamp
            | DbType::Date
            | DbType::Monetary
            | DbType::Short
            | DbType::Numeric
            | DbType::Char
            | DbType::BigInt
            | DbType::Datetime
    )
}

/// Lower-case an identifier, truncating it to the maximum identifier length.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if out.len() + c.len_utf8() > MAX_IDENTIFIER_LENGTH {
            break;
        }
        out.push(c);
    }
    out
}

/// Split a Java target signature such as "com.example.Cls.method(int)"
/// into its class ("com.example.Cls") and method ("method(int)").
pub fn split_target_signature(signature: &str) -> Option<(String, String)> {
    let paren = signature.rfind('(')?;
    let path = signature[..paren].trim();
    let dot = path.rfind('.')?;

    Some((
        path[..dot].to_string(),
        format!("{}{}", &path[dot + 1..], &signature[paren..]),
    ))
}

#[cfg(test)]
mod test {
    use super::{
        normalize_name, split_target_signature, ArgMode, ArgumentInfo, Directive, Lang,
        ProcedureInfo, SpType,
    };
    use crate::Error;
    use pl_session::{DbType, Value};

    fn procedure(args: Vec<ArgumentInfo>, return_type: DbType) -> ProcedureInfo {
        ProcedureInfo {
            unique_name: "dba.p".to_string(),
            name: "p".to_string(),
            pkg_name: Some("My_Pkg".to_string()),
            sp_type: SpType::Function,
            return_type,
            args,
            lang: Lang::Java,
            target_class: "Cls".to_string(),
            target_method: "p(int)".to_string(),
            owner: "dba".to_string(),
            directive: Directive::RightsOwner,
            is_system_generated: false,
            comment: String::new(),
        }
    }

    #[test]
    fn test_validate_normalizes() {
        let validated = procedure(
            vec![
                ArgumentInfo::new("a", DbType::Integer, ArgMode::In)
                    .with_default(Value::Integer(1)),
                ArgumentInfo::new("b", DbType::ResultSet, ArgMode::Out),
                ArgumentInfo::new("c", DbType::Set, ArgMode::InOut),
            ],
            DbType::ResultSet,
        )
        .validate()
        .unwrap();

        let info = validated.info();
        assert_eq!(info.pkg_name.as_deref(), Some("my_pkg"));
        assert_eq!(
            info.args.iter().map(|a| a.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(info.args[0].is_optional);
    }

    #[test]
    fn test_validate_rejects() {
        for mode in [ArgMode::In, ArgMode::InOut] {
            let err = procedure(
                vec![ArgumentInfo::new("rs", DbType::ResultSet, mode)],
                DbType::Null,
            )
            .validate()
            .unwrap_err();
            assert!(matches!(err, Error::CannotInputResultSet { .. }), "{err}");
        }

        let err = procedure(vec![ArgumentInfo::new("o", DbType::Oid, ArgMode::In)], DbType::Null)
            .validate()
            .unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"argument o of type oid is not supported");

        let err = procedure(vec![], DbType::Oid).validate().unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"return type oid is not supported");
    }

    #[test]
    fn test_names_and_signatures() {
        assert_eq!(normalize_name("DBMS_Output"), "dbms_output");
        assert_eq!(normalize_name(&"X".repeat(300)).len(), 254);

        assert_eq!(
            split_target_signature("com.cubrid.Cls.put_line (java.lang.String)"),
            Some((
                "com.cubrid.Cls".to_string(),
                "put_line(java.lang.String)".to_string()
            ))
        );
        assert_eq!(split_target_signature("no_parens"), None);
        assert_eq!(split_target_signature("nodot()"), None);
    }
}

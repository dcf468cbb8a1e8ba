use crate::{normalize_name, Error, Lang, MemoryCatalog};
use std::collections::{BTreeMap, BTreeSet};

/// Authorizer answers questions of user and group membership.
pub trait Authorizer: Send + Sync {
    /// Is `user` a member of the DBA group?
    fn is_dba_member(&self, user: &str) -> bool;
    /// Groups of which `user` is a member.
    fn groups(&self, user: &str) -> Vec<String>;
}

/// StaticAuthorizer is an Authorizer over fixed memberships.
/// User and group names are case-insensitive.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticAuthorizer {
    pub dba_members: BTreeSet<String>,
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl StaticAuthorizer {
    pub const DBA: &'static str = "dba";

    pub fn with_dba_member(mut self, user: &str) -> Self {
        self.dba_members.insert(normalize_name(user));
        self
    }

    pub fn with_group(mut self, user: &str, group: &str) -> Self {
        self.groups
            .entry(normalize_name(user))
            .or_default()
            .insert(normalize_name(group));
        self
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_dba_member(&self, user: &str) -> bool {
        let user = normalize_name(user);
        user == Self::DBA || self.dba_members.contains(&user)
    }

    fn groups(&self, user: &str) -> Vec<String> {
        self.groups
            .get(&normalize_name(user))
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// May `current` act on behalf of `creator`? It may if it's the same
/// user, a member of the DBA group, or a member of the creator's group.
pub fn check_owner(authorizer: &dyn Authorizer, creator: &str, current: &str) -> bool {
    if creator.eq_ignore_ascii_case(current) || authorizer.is_dba_member(current) {
        return true;
    }
    authorizer
        .groups(current)
        .iter()
        .any(|group| group.eq_ignore_ascii_case(creator))
}

/// Change the owner of stored procedure `unique_name` to `new_owner`.
/// Only members of the DBA group may do so. Every privilege granted on
/// the procedure is revoked, and it's renamed into the new owner's
/// namespace. Returns the new unique name.
pub fn change_procedure_owner(
    catalog: &MemoryCatalog,
    current_user: &str,
    unique_name: &str,
    new_owner: &str,
) -> Result<String, Error> {
    if !catalog.authorizer().is_dba_member(current_user) {
        return Err(Error::DbaOnly("change the owner of a stored procedure"));
    }
    let mut savepoint = catalog.savepoint();

    let row = savepoint
        .procedure(unique_name)
        .cloned()
        .ok_or_else(|| Error::NotFound(unique_name.to_string()))?;

    let revoked = savepoint.revoke_all_privileges(unique_name);

    let new_name = format!("{}.{}", normalize_name(new_owner), row.name);
    savepoint.rename_procedure(unique_name, &new_name, new_owner)?;

    if row.lang == Lang::PlCsql {
        savepoint.edit_stored_procedure_code(&row.target_class, Some(new_owner), None)?;
    }
    savepoint.commit();

    tracing::info!(
        from = %unique_name,
        to = %new_name,
        %revoked,
        "changed owner of stored procedure"
    );
    Ok(new_name)
}

pub mod auth;
mod builtin;
mod catalog;
mod descriptor;

pub use auth::{check_owner, Authorizer, StaticAuthorizer};
pub use builtin::builtin_procedures;
pub use catalog::{ArgumentRow, CatalogRecord, MemoryCatalog, ProcedureRow, Savepoint};
pub use descriptor::{
    check_param_type_supported, check_return_type_supported, normalize_name,
    split_target_signature, ArgMode, ArgumentInfo, CodeInfo, Directive, Lang, ProcedureInfo,
    SpType, ValidatedProcedure,
};

use pl_session::{DbType, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("argument {name} of type {ty} is not supported")]
    UnsupportedArgType { name: String, ty: DbType },
    #[error("argument {name} cannot take a result set as input")]
    CannotInputResultSet { name: String },
    #[error("a result set cannot be returned")]
    CannotReturnResultSet,
    #[error("return type {0} is not supported")]
    UnsupportedReturnType(DbType),
    #[error("{0} already exists")]
    DuplicateName(String),
    #[error("{user} is not permitted to act on behalf of {owner}")]
    OwnerCheck { user: String, owner: String },
    #[error("only members of the DBA group may {0}")]
    DbaOnly(&'static str),
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedArgType { .. }
            | Self::CannotInputResultSet { .. }
            | Self::CannotReturnResultSet
            | Self::UnsupportedReturnType(_) => ErrorKind::UnsupportedArgument,
            Self::OwnerCheck { .. } | Self::DbaOnly(_) => ErrorKind::PermissionDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateName(_) | Self::InvalidArgument(_) => ErrorKind::Internal,
        }
    }

    /// Stable numeric error code of this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnsupportedArgType { .. } => -1170,
            Self::CannotInputResultSet { .. } => -1171,
            Self::CannotReturnResultSet => -1172,
            Self::UnsupportedReturnType(_) => -1173,
            Self::DuplicateName(_) => -1174,
            Self::OwnerCheck { .. } => -1175,
            Self::DbaOnly(_) => -1176,
            Self::NotFound(_) => -1177,
            Self::InvalidArgument(_) => -1178,
        }
    }
}

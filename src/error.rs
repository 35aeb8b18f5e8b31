use thiserror::Error;

#[derive(Error, Debug)]
pub enum StowageError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Wrong type: {0}")]
    Type(String),
    #[error("Attribute name {key} is invalid. Attribute names may not contain periods or commas.")]
    Naming { key: String },
    #[error("No driver registered under tag '{0}'")]
    UnknownDriver(String),
    #[error("No entity named '{0}'")]
    UnknownEntity(String),
    #[error("Entity '{0}' already exists")]
    Duplicate(String),
    #[error(transparent)]
    Pool(#[from] PoolConflict),
}

/// A containment-invariant violation, carrying the offending pool(s)
/// so callers can render a full diagnostic.
#[derive(Error, Debug)]
pub enum PoolConflict {
    #[error("{target} is already in pools {pools:?}, cannot insert exclusively")]
    AlreadyPooled { target: String, pools: Vec<String> },
    #[error("{target} is in exclusive pool {pool}, cannot insert into any other pool")]
    InExclusivePool { target: String, pool: String },
    #[error("{target} is already in pool {pool}")]
    AlreadyMember { target: String, pool: String },
    #[error("{target} is already in unique pool(s) {pools:?}")]
    AlreadyUnique { target: String, pools: Vec<String> },
}

pub type Result<T> = std::result::Result<T, StowageError>;

// Helper conversions
impl From<rusqlite::Error> for StowageError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}

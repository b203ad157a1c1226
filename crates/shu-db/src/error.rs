use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} already exists")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type DbResult<T> = Result<T, DbError>;

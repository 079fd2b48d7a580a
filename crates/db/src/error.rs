use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("postgres: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The workflow or execution row does not exist.
    #[error("row not found")]
    NotFound,

    /// Execution ids are decimal strings outside this crate.
    #[error("'{0}' is not a valid execution id")]
    InvalidExecutionId(String),

    #[error("migrations failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

use thiserror::Error;

/// Postgres SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";
/// Postgres SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll not found")]
    PollNotFound,
    #[error("option not found")]
    OptionNotFound,
    #[error("poll is closed")]
    PollClosed,
    #[error("{0}")]
    Invalid(String),
    #[error("another global poll was activated at the same time")]
    Conflict,
    #[error("poll tables do not exist")]
    MissingSchema,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for PollError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code.into_owned());
        match code.as_deref() {
            Some(UNDEFINED_TABLE) => PollError::MissingSchema,
            Some(UNIQUE_VIOLATION) => PollError::Conflict,
            _ => PollError::Database(err),
        }
    }
}

pub type PollResult<T> = Result<T, PollError>;

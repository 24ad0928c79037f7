use tenantgrid_pool::PoolError;
use tenantgrid_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NumberingError {
    #[error("invalid sequence configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid sequence key: {0}")]
    InvalidKey(String),

    #[error("sequence {0} overflowed")]
    Overflow(String),

    #[error("counter store error: {0}")]
    State(#[from] StateError),

    #[error("tenant pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type NumberingResult<T> = Result<T, NumberingError>;

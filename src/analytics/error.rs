use crate::fields::ResolveError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ResolveError> for QueryError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::UnknownField(name) => {
                QueryError::InvalidRequest(format!("unknown field '{}'", name))
            }
            ResolveError::Store(e) => QueryError::Store(e),
        }
    }
}

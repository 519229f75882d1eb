use thiserror::Error;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend operation failed: {0}")]
    Backend(#[source] BoxedError),

    #[error("compact contact record: {0}")]
    Codec(#[from] postcard::Error),

    #[error("contact record carries no identifier")]
    MissingId,

    #[error("no tokio runtime to run backend requests on")]
    NoRuntime,

    #[error("cache is closed")]
    Closed,

    #[error("cannot build contact cache: {0}")]
    Builder(String),
}

impl CacheError {
    pub(crate) fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}

/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type. Component-level
/// failures that the pipeline reacts to (fetch, assembly, dispatch) have their
/// own typed results and never travel through here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Store(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

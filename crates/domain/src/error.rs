/// Shared error type used across all tether crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("MCP {code}: {message}")]
    Mcp { code: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("HTTP error: {status} ({message})")]
    Http { status: u16, message: String },

    #[error("Not signed in or session expired; run `mail-console signin`")]
    Unauthorized,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to decode task state: {0}")]
    StateDecode(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

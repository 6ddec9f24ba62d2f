use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bad command: {0}")]
    BadCommand(String),

    #[error("Target script does not exist: {0}")]
    ScriptNotFound(String),

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Cannot start process that is already running.")]
    AlreadyRunning,

    #[error("Cannot {action} process that is not running.")]
    NotRunning { action: &'static str },

    #[error("Message channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid uid: {0}")]
    InvalidUid(String),

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[cfg(unix)]
    #[error("Unix error: {0}")]
    Unix(#[from] nix::errno::Errno),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_running(action: &'static str) -> Self {
        Self::NotRunning { action }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Failed to launch ssh client: {0}")]
    Launch(String),

    #[error("SSH connection failed: {0}")]
    ConnectionFailed(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

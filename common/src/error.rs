use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Network counters unavailable: {0}")]
    Counters(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollingError {
    #[error("threshold out of range: {0}")]
    InvalidThreshold(f64),
    #[error("command queue closed")]
    QueueClosed,
}

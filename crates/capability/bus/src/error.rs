/// 总线错误。
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid topic filter: {0}")]
    InvalidFilter(String),
    #[error("not connected")]
    NotConnected,
    #[error("client error: {0}")]
    Client(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("handler error: {0}")]
    Handler(String),
}

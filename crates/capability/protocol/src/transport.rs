//! 传输适配层：在一条字节流上收发按行分隔的报文。

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{Instant, timeout};
use tracing::debug;

/// 可读写的串口字节流。
///
/// 真实串口为 `tokio_serial::SerialStream`，测试中为 `tokio::io::duplex`。
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> SerialLink for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 单个端口的传输适配器。
pub struct Transport {
    port: String,
    stream: BufReader<Box<dyn SerialLink>>,
    /// 跨超时保留的半行数据
    pending: Vec<u8>,
    write_timeout: Duration,
}

impl Transport {
    pub fn new(port: impl Into<String>, link: Box<dyn SerialLink>, write_timeout: Duration) -> Self {
        Self {
            port: port.into(),
            stream: BufReader::new(link),
            pending: Vec::new(),
            write_timeout,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// 写出全部字节（受写超时约束）。
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        match timeout(self.write_timeout, self.stream.get_mut().write_all(bytes)).await {
            Ok(result) => result.map_err(ProtocolError::from),
            Err(_) => Err(ProtocolError::WriteTimeout(self.port.clone())),
        }
    }

    /// 刷新写缓冲（受写超时约束）。
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        match timeout(self.write_timeout, self.stream.get_mut().flush()).await {
            Ok(result) => result.map_err(ProtocolError::from),
            Err(_) => Err(ProtocolError::WriteTimeout(self.port.clone())),
        }
    }

    /// 读取原始字节；已缓冲的半行优先返回。
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        Ok(self.stream.read(buf).await?)
    }

    /// 读取一行（去掉首尾空白）；超时返回 `Ok(None)`，半行数据保留到下次读取。
    ///
    /// 对端关闭且无剩余数据时返回 `ProtocolError::Closed`。
    pub async fn read_line(&mut self, wait: Duration) -> Result<Option<String>, ProtocolError> {
        let read = timeout(wait, self.stream.read_until(b'\n', &mut self.pending)).await;
        match read {
            Err(_) => Ok(None),
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(0)) if self.pending.is_empty() => Err(ProtocolError::Closed(self.port.clone())),
            Ok(Ok(_)) => {
                let raw = std::mem::take(&mut self.pending);
                Ok(Some(String::from_utf8_lossy(&raw).trim().to_string()))
            }
        }
    }

    /// 编码并发送一条报文。
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let line = envelope.encode_line()?;
        self.write(&line).await?;
        self.flush().await?;
        debug!(
            target: "edge.protocol",
            port = %self.port,
            topic = envelope.topic.as_str(),
            "serial_envelope_sent"
        );
        Ok(())
    }

    /// 在窗口内接收第一条可解析的报文；无法解析的行被跳过。
    pub async fn receive_envelope(
        &mut self,
        window: Duration,
    ) -> Result<Option<Envelope>, ProtocolError> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some(line) = self.read_line(remaining).await? else {
                return Ok(None);
            };
            if line.is_empty() {
                continue;
            }
            match Envelope::decode(&line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(err) => {
                    debug!(
                        target: "edge.protocol",
                        port = %self.port,
                        error = %err,
                        "serial_line_skipped"
                    );
                }
            }
        }
    }
}

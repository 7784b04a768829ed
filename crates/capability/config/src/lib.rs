//! 网关运行配置加载（`EDGE_*` 环境变量）。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 串口相关配置。
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// 单字节读超时，也是命令等待响应的默认窗口
    pub timeout: Duration,
    pub write_timeout: Duration,
    /// 获取端口租约的最长等待
    pub lease_timeout: Duration,
}

/// 轮询调度配置。
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    /// 每 N 个周期强制重载设备清单
    pub reload_every_cycles: u64,
    pub stop_timeout: Duration,
    pub error_backoff: Duration,
    pub devices_file: String,
    /// 未同步读数的补发间隔
    pub sync_interval: Duration,
}

/// MQTT 总线配置。
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub qos_subscribe: u8,
    pub qos_publish: u8,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    pub mqtt: MqttConfig,
}

impl AppConfig {
    /// 从环境变量读取配置；全部键都有默认值。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("EDGE_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".to_string());

        let serial = SerialConfig {
            baud_rate: read_u32_with_default("EDGE_SERIAL_BAUD_RATE", 115_200)?,
            timeout: read_seconds_with_default("EDGE_SERIAL_TIMEOUT_SECONDS", 5)?,
            write_timeout: read_seconds_with_default("EDGE_SERIAL_WRITE_TIMEOUT_SECONDS", 2)?,
            lease_timeout: read_seconds_with_default("EDGE_SERIAL_LEASE_TIMEOUT_SECONDS", 30)?,
        };

        let reload_every_cycles = read_u64_with_default("EDGE_CONFIG_RELOAD_CYCLES", 5)?;
        if reload_every_cycles == 0 {
            return Err(ConfigError::Invalid(
                "EDGE_CONFIG_RELOAD_CYCLES".to_string(),
                "0".to_string(),
            ));
        }
        let polling = PollingConfig {
            interval: read_seconds_with_default("EDGE_POLLING_INTERVAL_SECONDS", 10)?,
            reload_every_cycles,
            stop_timeout: read_seconds_with_default("EDGE_POLLING_STOP_TIMEOUT_SECONDS", 10)?,
            error_backoff: read_seconds_with_default("EDGE_POLLING_ERROR_BACKOFF_SECONDS", 5)?,
            devices_file: env::var("EDGE_DEVICES_CONFIG_FILE")
                .unwrap_or_else(|_| "./config/bluetooth_devices.json".to_string()),
            sync_interval: read_seconds_with_default("EDGE_SYNC_INTERVAL_SECONDS", 3600)?,
        };

        let qos_subscribe = read_u8_with_default("EDGE_MQTT_QOS_SUBSCRIBE", 1)?;
        let qos_publish = read_u8_with_default("EDGE_MQTT_QOS_PUBLISH", 1)?;
        for (key, value) in [
            ("EDGE_MQTT_QOS_SUBSCRIBE", qos_subscribe),
            ("EDGE_MQTT_QOS_PUBLISH", qos_publish),
        ] {
            if value > 2 {
                return Err(ConfigError::Invalid(key.to_string(), value.to_string()));
            }
        }
        let mqtt = MqttConfig {
            host: env::var("EDGE_MQTT_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: read_u16_with_default("EDGE_MQTT_PORT", 1883)?,
            client_id: env::var("EDGE_MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "edge-service-001".to_string()),
            username: read_optional("EDGE_MQTT_USERNAME"),
            password: read_optional("EDGE_MQTT_PASSWORD"),
            keep_alive: read_seconds_with_default("EDGE_MQTT_KEEP_ALIVE_SECONDS", 60)?,
            reconnect_delay: read_seconds_with_default("EDGE_MQTT_RECONNECT_DELAY_SECONDS", 5)?,
            qos_subscribe,
            qos_publish,
        };

        Ok(Self {
            http_addr,
            serial,
            polling,
            mqtt,
        })
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取秒数；0 视为非法（超时与间隔必须为正）。
fn read_seconds_with_default(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let seconds = read_u64_with_default(key, default)?;
    if seconds == 0 {
        return Err(ConfigError::Invalid(key.to_string(), "0".to_string()));
    }
    Ok(Duration::from_secs(seconds))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

//! 设备清单来源。

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// 清单读取错误。
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("device list not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid device list: {0}")]
    Parse(String),
}

/// 清单中的一项（未校验）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "deviceIdentifier", alias = "identifier", default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
}

/// 设备清单来源：提供变更标记与条目列表。
pub trait DeviceListSource: Send + Sync {
    /// 来源的最后修改时间；不存在时返回 `RegistryError::NotFound`。
    fn modified(&self) -> Result<SystemTime, RegistryError>;

    fn load(&self) -> Result<Vec<DeviceEntry>, RegistryError>;

    fn describe(&self) -> String;
}

/// JSON 文件：`{"devices": [{"deviceIdentifier": "SENSOR-001", "port": "COM4"}]}`。
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Deserialize)]
struct DeviceFile {
    #[serde(default)]
    devices: Vec<Value>,
}

impl DeviceListSource for JsonFileSource {
    fn modified(&self) -> Result<SystemTime, RegistryError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.modified()?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(RegistryError::NotFound(self.describe()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn load(&self) -> Result<Vec<DeviceEntry>, RegistryError> {
        let text = std::fs::read_to_string(&self.path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RegistryError::NotFound(self.describe())
            } else {
                RegistryError::Io(err)
            }
        })?;
        let file: DeviceFile =
            serde_json::from_str(&text).map_err(|err| RegistryError::Parse(err.to_string()))?;
        // 单项格式错误只丢弃该项，交给注册表按"缺字段"处理
        Ok(file
            .devices
            .into_iter()
            .map(|value| serde_json::from_value(value).unwrap_or_default())
            .collect())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

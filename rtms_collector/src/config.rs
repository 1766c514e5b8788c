use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::error::ConfigError;
use crate::region::DistrictNaming;
use crate::response::ResponseMode;

pub const DEFAULT_ENDPOINT: &str =
    "https://apis.data.go.kr/1613000/RTMSDataSvcAptTrade/getRTMSDataSvcAptTrade";

/// Environment variable holding the data.go.kr service key.
pub const SERVICE_KEY_ENV: &str = "RTMS_SERVICE_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub api: ApiConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Reads a TOML config. Absent tables and keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let buf = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&buf).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(buf: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(buf)
    }

    /// Loads `path` when given, otherwise `rtms.toml` in the working
    /// directory if present, otherwise the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new("rtms.toml");
                if local.is_file() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
    /// Encoding labels tried in order, first clean decode wins.
    pub encodings: Vec<String>,
    #[serde_as(as = "DisplayFromStr")]
    pub district_naming: DistrictNaming,
    pub code_column: String,
    pub name_column: String,
    pub status_column: String,
    pub active_value: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/법정동코드 전체자료.txt"),
            encodings: vec!["utf-8".to_string(), "euc-kr".to_string()],
            district_naming: DistrictNaming::FirstToken,
            code_column: "법정동코드".to_string(),
            name_column: "법정동명".to_string(),
            status_column: "폐지여부".to_string(),
            active_value: "존재".to_string(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub endpoint: String,
    #[serde_as(as = "DisplayFromStr")]
    pub mode: ResponseMode,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub delay_ms: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            mode: ResponseMode::Current,
            timeout_secs: 15,
            page_size: 1000,
            delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

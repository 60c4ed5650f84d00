use std::{collections::HashMap, env, path::Path};

use serde::Deserialize;
use tokio::fs;

mod entry_point;
mod error;
pub mod logging;

pub use entry_point::{EntryPointProtocol, EntryPointSettings, EntryPointTlsSettings};
pub use error::SettingsError;
pub use logging::{LogFormat, LogSettings};

pub type Result<T> = std::result::Result<T, SettingsError>;

/// 프로세스 부트스트랩 설정입니다.
///
/// 엔트리포인트와 프로바이더 목록은 프로세스 시작 시점에 고정되고,
/// 라우터/서비스/미들웨어는 프로바이더가 동적으로 공급합니다.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 엔트리포인트 설정 (이름 -> 주소/프로토콜/TLS)
    #[serde(default)]
    pub entry_points: HashMap<String, EntryPointSettings>,

    /// 프로바이더 설정
    #[serde(default)]
    pub providers: ProvidersSettings,

    /// 로깅 설정
    #[serde(default)]
    pub logging: LogSettings,

    /// 업스트림 요청 타임아웃 (초)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout: u64,
}

/// 프로바이더 공통 설정과 파일 프로바이더 설정입니다.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersSettings {
    /// 프로바이더 제출 디바운스 윈도우 (초)
    #[serde(default = "default_throttle")]
    pub throttle: u64,

    /// 파일 프로바이더
    #[serde(default)]
    pub file: Option<FileProviderSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileProviderSettings {
    /// 동적 설정 TOML 파일 경로
    pub path: String,

    /// 변경 감지 폴링 주기 (초)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn default_throttle() -> u64 {
    2
}

fn default_poll_interval() -> u64 {
    5
}

fn default_upstream_timeout() -> u64 {
    30
}

impl Default for ProvidersSettings {
    fn default() -> Self {
        Self {
            throttle: default_throttle(),
            file: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            entry_points: HashMap::new(),
            providers: ProvidersSettings::default(),
            logging: LogSettings::default(),
            upstream_timeout: default_upstream_timeout(),
        }
    }
}

impl Settings {
    /// 설정을 로드합니다.
    ///
    /// `PROXY_CONFIG_FILE` 환경 변수가 있으면 TOML 파일을, 없으면 환경 변수를 사용합니다.
    pub async fn load() -> Result<Self> {
        if let Ok(config_path) = env::var("PROXY_CONFIG_FILE") {
            Self::from_toml_file(&config_path).await
        } else {
            Self::from_env()
        }
    }

    pub async fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).await.map_err(|e| SettingsError::FileError {
            path: path.as_ref().to_string_lossy().to_string(),
            error: e,
        })?;

        let settings: Self =
            toml::from_str(&content).map_err(|e| SettingsError::ParseError { source: e })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_env() -> Result<Self> {
        let mut entry_points = HashMap::new();
        entry_points.insert("web".to_string(), EntryPointSettings::from_env()?);

        let file = match env::var("PROXY_DYNAMIC_CONFIG") {
            Ok(path) => Some(FileProviderSettings {
                path,
                poll_interval: parse_env_var("PROXY_POLL_INTERVAL", default_poll_interval)?,
            }),
            Err(_) => None,
        };

        let settings = Self {
            entry_points,
            providers: ProvidersSettings {
                throttle: parse_env_var("PROXY_PROVIDERS_THROTTLE", default_throttle)?,
                file,
            },
            logging: LogSettings::from_env()?,
            upstream_timeout: parse_env_var("PROXY_UPSTREAM_TIMEOUT", default_upstream_timeout)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<()> {
        if self.entry_points.is_empty() {
            return Err(SettingsError::InvalidConfig(
                "엔트리포인트가 최소 하나 필요합니다".to_string(),
            ));
        }

        for (name, entry_point) in &self.entry_points {
            entry_point.validate(name)?;
        }

        if self.providers.throttle == 0 {
            return Err(SettingsError::InvalidConfig(
                "providers.throttle은 0이 될 수 없습니다".to_string(),
            ));
        }

        Ok(())
    }
}

/// 환경 변수를 파싱하고, 없으면 기본값을 사용합니다.
pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

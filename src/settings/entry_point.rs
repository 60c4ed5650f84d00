use std::net::SocketAddr;

use serde::Deserialize;

use super::{parse_env_var, Result, SettingsError};

/// 엔트리포인트가 수락하는 프로토콜입니다.
///
/// `Http`는 일반 HTTP 서버로 동작하고, `Tcp`는 SNI 기반 TCP 라우팅과
/// HTTP 폴스루를 함께 지원합니다.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPointProtocol {
    Http,
    Tcp,
}

impl Default for EntryPointProtocol {
    fn default() -> Self {
        EntryPointProtocol::Http
    }
}

/// 엔트리포인트 하나의 리스너 설정입니다.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointSettings {
    /// 바인딩 주소 (예: "0.0.0.0:80")
    pub address: String,

    #[serde(default)]
    pub protocol: EntryPointProtocol,

    /// 요청 헤더 읽기 타임아웃 (초)
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// 정적 TLS 설정. 있으면 이 엔트리포인트는 TLS를 종료합니다.
    #[serde(default)]
    pub tls: Option<EntryPointTlsSettings>,
}

fn default_read_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryPointTlsSettings {
    pub cert_path: String,
    pub key_path: String,
}

impl EntryPointSettings {
    pub fn from_env() -> Result<Self> {
        let port: u16 = parse_env_var("PROXY_HTTP_PORT", || 80u16)?;
        Ok(Self {
            address: format!("0.0.0.0:{}", port),
            protocol: EntryPointProtocol::Http,
            read_timeout: parse_env_var("PROXY_READ_TIMEOUT", default_read_timeout)?,
            tls: None,
        })
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        self.address.parse::<SocketAddr>().map_err(|e| SettingsError::InvalidConfig(format!(
            "엔트리포인트 '{}'의 주소 '{}'가 유효하지 않음: {}",
            name, self.address, e
        )))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        let entry_point = EntryPointSettings {
            address: "0.0.0.0:80".to_string(),
            protocol: EntryPointProtocol::Http,
            read_timeout: 30,
            tls: None,
        };
        assert!(entry_point.validate("web").is_ok());

        let invalid = EntryPointSettings {
            address: "not-an-address".to_string(),
            protocol: EntryPointProtocol::Http,
            read_timeout: 30,
            tls: None,
        };
        assert!(invalid.validate("web").is_err());
    }
}

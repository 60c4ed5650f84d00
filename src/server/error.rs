use std::fmt;

use crate::settings::SettingsError;

#[derive(Debug)]
pub enum Error {
    /// 설정 관련 오류
    Config {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 파일 시스템/네트워크 I/O 오류
    Io {
        message: String,
        source: std::io::Error,
    },

    /// TLS 설정 오류
    Tls {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 서버 실행 오류
    Server {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<SettingsError> for Error {
    fn from(err: SettingsError) -> Self {
        Error::Config {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { message, .. } => write!(f, "설정 오류: {}", message),
            Error::Io { message, .. } => write!(f, "I/O 오류: {}", message),
            Error::Tls { message, .. } => write!(f, "TLS 오류: {}", message),
            Error::Server { message, .. } => write!(f, "서버 오류: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Config { source, .. }
            | Error::Tls { source, .. }
            | Error::Server { source, .. } => {
                source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

#[derive(Debug)]
pub enum MiddlewareError {
    /// 미들웨어 설정 오류
    Config {
        middleware: String,
        message: String,
    },
    /// 미들웨어 실행 중 오류
    Runtime {
        middleware: String,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// 형식 오류
    InvalidFormat(String),
    /// 인증 실패. 401 응답을 담아 체인을 중단한다.
    Unauthorized(Response<Full<Bytes>>),
    /// Rate limit 초과. 429 응답을 담아 체인을 중단한다.
    TooManyRequests(Response<Full<Bytes>>),
    /// 스킴 리다이렉트. 3xx 응답을 담아 체인을 중단한다.
    Redirect(Response<Full<Bytes>>),
}

impl fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { middleware, message } => {
                write!(f, "미들웨어 {} 설정 오류: {}", middleware, message)
            }
            Self::Runtime { middleware, message, .. } => {
                write!(f, "미들웨어 {} 실행 오류: {}", middleware, message)
            }
            Self::InvalidFormat(message) => write!(f, "형식 오류: {}", message),
            Self::Unauthorized(_) => write!(f, "인증 실패"),
            Self::TooManyRequests(_) => write!(f, "Rate limit exceeded"),
            Self::Redirect(_) => write!(f, "스킴 리다이렉트"),
        }
    }
}

impl std::error::Error for MiddlewareError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Runtime { source: Some(err), .. } => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MiddlewareError {
    fn from(err: serde_json::Error) -> Self {
        MiddlewareError::InvalidFormat(err.to_string())
    }
}

/// 미들웨어 에러를 클라이언트 응답으로 변환합니다.
///
/// 응답을 담은 변형은 그 응답을 그대로 반환하고, 나머지는 500으로 처리합니다.
pub fn error_response(err: MiddlewareError) -> Response<Full<Bytes>> {
    match err {
        MiddlewareError::Unauthorized(res)
        | MiddlewareError::TooManyRequests(res)
        | MiddlewareError::Redirect(res) => res,
        other => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from(format!("Internal Server Error: {}", other))))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("Internal Server Error")))),
    }
}

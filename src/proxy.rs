//! 업스트림으로 HTTP 요청을 전달하는 프록시 클라이언트입니다.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, HOST};
use hyper::{Response, StatusCode, Uri};
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::middleware::Request;

/// 프록시 요청을 위한 불변 설정 구조체
#[derive(Clone)]
pub struct ProxyClient {
    client: legacy::Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(timeout: Duration) -> Self {
        let connector = HttpConnector::new();
        let client = legacy::Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self { client, timeout }
    }

    /// 요청을 지정한 업스트림으로 전달하고 응답 본문을 수집해 반환합니다.
    ///
    /// `pass_host_header`가 false면 Host 헤더를 업스트림 authority로 교체합니다.
    /// 업스트림 왕복이 타임아웃을 초과하면 `ProxyError::Timeout`을 반환하고,
    /// 호출자는 502로 변환합니다.
    pub async fn forward(
        &self,
        base: &Uri,
        req: Request,
        pass_host_header: bool,
    ) -> Result<Response<Full<Bytes>>, ProxyError> {
        let backend = base.to_string();

        let proxied = build_proxied_request(base, req, pass_host_header)?;
        debug!(backend = %backend, uri = %proxied.uri(), "업스트림으로 요청 전달");

        let result = tokio::time::timeout(self.timeout, self.client.request(proxied)).await;

        let response = match result {
            Err(_) => {
                return Err(ProxyError::Timeout {
                    backend,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.is_connect() => {
                return Err(ProxyError::Connect {
                    backend,
                    reason: e.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(ProxyError::Request {
                    backend,
                    reason: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| ProxyError::Body {
                backend,
                reason: e.to_string(),
            })?
            .to_bytes();

        Ok(Response::from_parts(parts, Full::new(bytes)))
    }
}

fn build_proxied_request(
    base: &Uri,
    req: Request,
    pass_host_header: bool,
) -> Result<Request, ProxyError> {
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base
        .authority()
        .ok_or_else(|| ProxyError::Build {
            reason: format!("업스트림 URL에 authority 없음: {}", base),
        })?
        .clone();

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri: Uri = format!("{}://{}{}", scheme, authority, path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::Build {
            reason: e.to_string(),
        })?;

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    if !pass_host_header {
        let value = HeaderValue::from_str(authority.as_str()).map_err(|e| ProxyError::Build {
            reason: e.to_string(),
        })?;
        parts.headers.insert(HOST, value);
    }

    Ok(hyper::Request::from_parts(parts, body))
}

#[derive(Debug)]
pub enum ProxyError {
    /// 업스트림 왕복 타임아웃
    Timeout {
        backend: String,
        timeout_secs: u64,
    },
    /// 업스트림 연결 실패
    Connect {
        backend: String,
        reason: String,
    },
    /// 업스트림 요청 실패
    Request {
        backend: String,
        reason: String,
    },
    /// 응답 본문 수집 실패
    Body {
        backend: String,
        reason: String,
    },
    /// 요청 빌드 실패
    Build {
        reason: String,
    },
}

impl ProxyError {
    /// 재시도(다음 서버 선택)가 의미 있는 오류인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::Connect { .. })
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Timeout { backend, timeout_secs } => {
                write!(f, "백엔드 {} 타임아웃 ({}초)", backend, timeout_secs)
            }
            ProxyError::Connect { backend, reason } => {
                write!(f, "백엔드 {} 연결 실패: {}", backend, reason)
            }
            ProxyError::Request { backend, reason } => {
                write!(f, "백엔드 {} 요청 실패: {}", backend, reason)
            }
            ProxyError::Body { backend, reason } => {
                write!(f, "백엔드 {} 응답 처리 실패: {}", backend, reason)
            }
            ProxyError::Build { reason } => write!(f, "요청 빌드 실패: {}", reason),
        }
    }
}

impl std::error::Error for ProxyError {}

/// 프록시 오류를 클라이언트 응답으로 변환합니다.
pub fn error_response(error: &ProxyError) -> Response<Full<Bytes>> {
    let status = match error {
        ProxyError::Build { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };

    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(format!("{}", error))))
        .unwrap_or_else(|_| {
            let mut res = Response::new(Full::new(Bytes::from("Bad Gateway")));
            *res.status_mut() = StatusCode::BAD_GATEWAY;
            res
        })
}

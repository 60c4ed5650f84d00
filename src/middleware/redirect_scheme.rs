use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, StatusCode};
use serde::{Deserialize, Serialize};

use super::{Middleware, MiddlewareError, Request, Response};

/// redirectScheme 미들웨어 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectSchemeConfig {
    #[serde(default, alias = "Scheme")]
    pub scheme: String,

    /// 대상 포트. 없으면 스킴 기본 포트를 사용한다.
    #[serde(default, alias = "Port", skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// true면 301, 아니면 302
    #[serde(default, alias = "Permanent")]
    pub permanent: bool,
}

/// 요청을 다른 스킴으로 리다이렉트하는 미들웨어입니다.
#[derive(Debug)]
pub struct RedirectSchemeMiddleware {
    config: RedirectSchemeConfig,
}

impl RedirectSchemeMiddleware {
    pub fn new(config: RedirectSchemeConfig) -> Result<Self, MiddlewareError> {
        match config.scheme.as_str() {
            "http" | "https" => Ok(Self { config }),
            other => Err(MiddlewareError::Config {
                middleware: "redirectScheme".to_string(),
                message: format!("지원하지 않는 스킴 '{}'", other),
            }),
        }
    }

    fn location(&self, req: &Request) -> Option<String> {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())?;

        // 기존 포트는 버리고 설정된 포트로 교체한다
        let host_without_port = host.split(':').next().unwrap_or(host);
        let authority = match &self.config.port {
            Some(port) => format!("{}:{}", host_without_port, port),
            None => host_without_port.to_string(),
        };

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Some(format!("{}://{}{}", self.config.scheme, authority, path_and_query))
    }
}

#[async_trait]
impl Middleware for RedirectSchemeMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        let location = self.location(&req).ok_or_else(|| {
            MiddlewareError::InvalidFormat("Host 헤더 없이 리다이렉트 불가".to_string())
        })?;

        let status = if self.config.permanent {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::FOUND
        };

        let response = hyper::Response::builder()
            .status(status)
            .header(header::LOCATION, &location)
            .body(Full::new(Bytes::new()))
            .map_err(|e| MiddlewareError::InvalidFormat(e.to_string()))?;

        Err(MiddlewareError::Redirect(response))
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "redirectScheme"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        hyper::Request::builder()
            .uri("http://foo.bar/path?q=1")
            .header(header::HOST, "foo.bar")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_redirects_to_https() {
        let middleware = RedirectSchemeMiddleware::new(RedirectSchemeConfig {
            scheme: "https".to_string(),
            port: None,
            permanent: false,
        })
        .unwrap();

        match middleware.handle_request(request()).await {
            Err(MiddlewareError::Redirect(res)) => {
                assert_eq!(res.status(), StatusCode::FOUND);
                assert_eq!(
                    res.headers().get(header::LOCATION).unwrap(),
                    "https://foo.bar/path?q=1"
                );
            }
            other => panic!("리다이렉트 응답이 필요한데: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_redirect_with_port_and_permanent() {
        let middleware = RedirectSchemeMiddleware::new(RedirectSchemeConfig {
            scheme: "https".to_string(),
            port: Some("8443".to_string()),
            permanent: true,
        })
        .unwrap();

        match middleware.handle_request(request()).await {
            Err(MiddlewareError::Redirect(res)) => {
                assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
                assert_eq!(
                    res.headers().get(header::LOCATION).unwrap(),
                    "https://foo.bar:8443/path?q=1"
                );
            }
            other => panic!("리다이렉트 응답이 필요한데: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let result = RedirectSchemeMiddleware::new(RedirectSchemeConfig {
            scheme: "ftp".to_string(),
            port: None,
            permanent: false,
        });
        assert!(matches!(result, Err(MiddlewareError::Config { .. })));
    }
}

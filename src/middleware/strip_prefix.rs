use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Middleware, MiddlewareError, Request, Response};

/// stripPrefix 미들웨어 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripPrefixConfig {
    #[serde(default, alias = "Prefixes")]
    pub prefixes: Vec<String>,
}

/// 요청 경로에서 접두사를 제거하는 미들웨어입니다.
///
/// 제거된 접두사는 `X-Forwarded-Prefix` 헤더로 업스트림에 전달됩니다.
#[derive(Debug)]
pub struct StripPrefixMiddleware {
    prefixes: Vec<String>,
}

impl StripPrefixMiddleware {
    pub fn new(config: StripPrefixConfig) -> Result<Self, MiddlewareError> {
        if config.prefixes.is_empty() {
            return Err(MiddlewareError::Config {
                middleware: "stripPrefix".to_string(),
                message: "접두사 목록이 비어 있음".to_string(),
            });
        }
        for prefix in &config.prefixes {
            if !prefix.starts_with('/') {
                return Err(MiddlewareError::Config {
                    middleware: "stripPrefix".to_string(),
                    message: format!("접두사 '{}'는 '/'로 시작해야 함", prefix),
                });
            }
        }

        Ok(Self {
            prefixes: config.prefixes,
        })
    }
}

#[async_trait]
impl Middleware for StripPrefixMiddleware {
    async fn handle_request(&self, mut req: Request) -> Result<Request, MiddlewareError> {
        let path = req.uri().path().to_string();

        for prefix in &self.prefixes {
            let stripped = if path == *prefix {
                Some("/".to_string())
            } else if let Some(rest) = path.strip_prefix(&format!("{}/", prefix.trim_end_matches('/'))) {
                Some(format!("/{}", rest))
            } else {
                None
            };

            if let Some(new_path) = stripped {
                replace_path(&mut req, &new_path)?;
                req.headers_mut().insert(
                    hyper::header::HeaderName::from_static("x-forwarded-prefix"),
                    hyper::header::HeaderValue::from_str(prefix).map_err(|e| {
                        MiddlewareError::InvalidFormat(e.to_string())
                    })?,
                );
                break;
            }
        }

        Ok(req)
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "stripPrefix"
    }
}

/// 쿼리 문자열을 보존하면서 요청 경로를 교체합니다.
pub(crate) fn replace_path(req: &mut Request, new_path: &str) -> Result<(), MiddlewareError> {
    let mut parts = req.uri().clone().into_parts();
    let path_and_query = match req.uri().query() {
        Some(query) => format!("{}?{}", new_path, query),
        None => new_path.to_string(),
    };
    parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| MiddlewareError::InvalidFormat(e.to_string()))?,
    );
    *req.uri_mut() = hyper::Uri::from_parts(parts)
        .map_err(|e| MiddlewareError::InvalidFormat(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request(path: &str) -> Request {
        hyper::Request::builder()
            .uri(format!("http://foo.bar{}", path))
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_strips_matching_prefix() {
        let middleware = StripPrefixMiddleware::new(StripPrefixConfig {
            prefixes: vec!["/api".to_string()],
        })
        .unwrap();

        let req = middleware.handle_request(request("/api/users")).await.unwrap();
        assert_eq!(req.uri().path(), "/users");
        assert_eq!(req.headers().get("x-forwarded-prefix").unwrap(), "/api");
    }

    #[tokio::test]
    async fn test_exact_prefix_becomes_root() {
        let middleware = StripPrefixMiddleware::new(StripPrefixConfig {
            prefixes: vec!["/api".to_string()],
        })
        .unwrap();

        let req = middleware.handle_request(request("/api")).await.unwrap();
        assert_eq!(req.uri().path(), "/");
    }

    #[tokio::test]
    async fn test_preserves_query() {
        let middleware = StripPrefixMiddleware::new(StripPrefixConfig {
            prefixes: vec!["/api".to_string()],
        })
        .unwrap();

        let req = middleware
            .handle_request(request("/api/users?page=2"))
            .await
            .unwrap();
        assert_eq!(req.uri().path(), "/users");
        assert_eq!(req.uri().query(), Some("page=2"));
    }

    #[tokio::test]
    async fn test_non_matching_path_unchanged() {
        let middleware = StripPrefixMiddleware::new(StripPrefixConfig {
            prefixes: vec!["/api".to_string()],
        })
        .unwrap();

        let req = middleware.handle_request(request("/other")).await.unwrap();
        assert_eq!(req.uri().path(), "/other");
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let result = StripPrefixMiddleware::new(StripPrefixConfig {
            prefixes: vec!["api".to_string()],
        });
        assert!(matches!(result, Err(MiddlewareError::Config { .. })));
    }
}

use async_trait::async_trait;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use tracing::debug;

use crate::middleware::{Middleware, MiddlewareError, Request, Response};

use super::config::HeadersConfig;

/// 헤더 수정 미들웨어
#[derive(Debug)]
pub struct HeadersMiddleware {
    config: HeadersConfig,
}

impl HeadersMiddleware {
    pub fn new(config: HeadersConfig) -> Result<Self, MiddlewareError> {
        // 헤더 이름/값은 빌드 시점에 검증한다
        for (name, value) in config
            .custom_request_headers
            .iter()
            .chain(config.custom_response_headers.iter())
        {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| MiddlewareError::Config {
                middleware: "headers".to_string(),
                message: format!("잘못된 헤더 이름 '{}': {}", name, e),
            })?;
            HeaderValue::from_str(value).map_err(|e| MiddlewareError::Config {
                middleware: "headers".to_string(),
                message: format!("잘못된 헤더 값 '{}': {}", value, e),
            })?;
        }

        Ok(Self { config })
    }

    fn apply(modifications: &std::collections::HashMap<String, String>, headers: &mut HeaderMap) {
        for (name, value) in modifications {
            // 빌드 시점에 검증되었으므로 여기서는 실패하지 않는다
            let name = match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(_) => continue,
            };
            if value.is_empty() {
                headers.remove(&name);
            } else if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
}

#[async_trait]
impl Middleware for HeadersMiddleware {
    async fn handle_request(&self, mut req: Request) -> Result<Request, MiddlewareError> {
        Self::apply(&self.config.custom_request_headers, req.headers_mut());
        debug!(headers = ?req.headers(), "요청 헤더 수정 완료");
        Ok(req)
    }

    async fn handle_response(&self, mut res: Response) -> Result<Response, MiddlewareError> {
        Self::apply(&self.config.custom_response_headers, res.headers_mut());
        Ok(res)
    }

    fn name(&self) -> &str {
        "headers"
    }
}

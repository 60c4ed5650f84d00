use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use tracing::debug;

use crate::middleware::{Middleware, MiddlewareError, Request, Response};

use super::config::RateLimitConfig;
use super::store::{MemoryStore, RateLimitStore};

/// Rate Limit 미들웨어
pub struct RateLimitMiddleware {
    config: RateLimitConfig,
    store: MemoryStore,
}

impl RateLimitMiddleware {
    pub fn new(config: RateLimitConfig) -> Result<Self, MiddlewareError> {
        if config.average == 0 {
            return Err(MiddlewareError::Config {
                middleware: "rateLimit".to_string(),
                message: "average는 0이 될 수 없음".to_string(),
            });
        }

        Ok(Self {
            config,
            store: MemoryStore::new(),
        })
    }

    /// 클라이언트 식별자를 추출합니다.
    fn client_id(req: &Request) -> String {
        // X-Forwarded-For 헤더 확인
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
        {
            if let Some(ip) = forwarded.split(',').next() {
                return ip.trim().to_string();
            }
        }

        // X-Real-IP 헤더 확인
        if let Some(real_ip) = req.headers().get("x-real-ip").and_then(|h| h.to_str().ok()) {
            return real_ip.to_string();
        }

        "unknown".to_string()
    }

    /// Rate Limit 초과 응답을 생성합니다.
    async fn limit_exceeded_response(&self, key: &str) -> Response {
        let wait_time = self
            .store
            .time_to_next_request(key)
            .await
            .unwrap_or_default();

        hyper::Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header("X-RateLimit-Limit", self.config.average.to_string())
            .header("Retry-After", wait_time.as_secs().max(1).to_string())
            .body(Full::new(Bytes::from("Rate limit exceeded")))
            .unwrap_or_else(|_| {
                let mut res = Response::new(Full::new(Bytes::from("Rate limit exceeded")));
                *res.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                res
            })
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        let client_id = Self::client_id(&req);
        debug!(client = %client_id, "rate limit 검사");

        if self
            .store
            .check_rate(
                &client_id,
                self.config.average as f64,
                self.config.effective_burst() as f64,
            )
            .await
        {
            Ok(req)
        } else {
            let response = self.limit_exceeded_response(&client_id).await;
            Err(MiddlewareError::TooManyRequests(response))
        }
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "rateLimit"
    }
}

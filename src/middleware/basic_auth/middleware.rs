use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, StatusCode};

use crate::middleware::{Middleware, MiddlewareError, Request, Response};

use super::auth::UserVerifier;
use super::config::BasicAuthConfig;

/// Basic 인증 미들웨어
pub struct BasicAuthMiddleware {
    realm: String,
    verifier: UserVerifier,
}

impl BasicAuthMiddleware {
    pub fn new(config: BasicAuthConfig) -> Result<Self, MiddlewareError> {
        let verifier = UserVerifier::from_config(&config)?;
        Ok(Self {
            realm: config.realm,
            verifier,
        })
    }

    /// Authorization 헤더에서 자격증명을 추출합니다.
    fn extract_credentials(&self, req: &Request) -> Option<(String, String)> {
        let auth_str = req
            .headers()
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?;

        let encoded = auth_str.strip_prefix("Basic ")?.trim();
        let decoded = BASE64.decode(encoded).ok()?;
        let creds = std::str::from_utf8(&decoded).ok()?;

        let (username, password) = creds.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }

    /// 401 Unauthorized 응답을 생성합니다.
    fn unauthorized_response(&self) -> Response {
        hyper::Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(
                header::WWW_AUTHENTICATE,
                format!("Basic realm=\"{}\"", self.realm),
            )
            .body(Full::new(Bytes::from("Unauthorized")))
            .unwrap_or_else(|_| {
                let mut res = Response::new(Full::new(Bytes::from("Unauthorized")));
                *res.status_mut() = StatusCode::UNAUTHORIZED;
                res
            })
    }
}

#[async_trait]
impl Middleware for BasicAuthMiddleware {
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError> {
        match self.extract_credentials(&req) {
            Some((username, password)) if self.verifier.verify(&username, &password) => Ok(req),
            _ => Err(MiddlewareError::Unauthorized(self.unauthorized_response())),
        }
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "basicAuth"
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::strip_prefix::replace_path;
use super::{Middleware, MiddlewareError, Request, Response};

/// addPrefix 미들웨어 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPrefixConfig {
    #[serde(default, alias = "Prefix")]
    pub prefix: String,
}

/// 요청 경로 앞에 접두사를 붙이는 미들웨어입니다.
#[derive(Debug)]
pub struct AddPrefixMiddleware {
    prefix: String,
}

impl AddPrefixMiddleware {
    pub fn new(config: AddPrefixConfig) -> Result<Self, MiddlewareError> {
        if config.prefix.is_empty() || !config.prefix.starts_with('/') {
            return Err(MiddlewareError::Config {
                middleware: "addPrefix".to_string(),
                message: format!("접두사 '{}'는 '/'로 시작하는 비어 있지 않은 경로여야 함", config.prefix),
            });
        }

        Ok(Self {
            prefix: config.prefix.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Middleware for AddPrefixMiddleware {
    async fn handle_request(&self, mut req: Request) -> Result<Request, MiddlewareError> {
        let new_path = format!("{}{}", self.prefix, req.uri().path());
        replace_path(&mut req, &new_path)?;
        Ok(req)
    }

    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError> {
        Ok(res)
    }

    fn name(&self) -> &str {
        "addPrefix"
    }
}

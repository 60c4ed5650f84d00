use tracing::debug;

use super::{Middleware, MiddlewareError, Request, Response};

/// 라우터 하나에 연결된 순서 있는 미들웨어 체인입니다.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add_boxed(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn add<M: Middleware>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// 선언 순서대로 요청을 통과시킵니다. 첫 번째 미들웨어가 가장 바깥쪽입니다.
    pub async fn handle_request(&self, mut request: Request) -> Result<Request, MiddlewareError> {
        for middleware in &self.middlewares {
            debug!(middleware = middleware.name(), "요청 미들웨어 처리");
            request = middleware.handle_request(request).await?;
        }
        Ok(request)
    }

    /// 응답은 역순으로 처리합니다.
    pub async fn handle_response(&self, mut response: Response) -> Result<Response, MiddlewareError> {
        for middleware in self.middlewares.iter().rev() {
            debug!(middleware = middleware.name(), "응답 미들웨어 처리");
            response = middleware.handle_response(response).await?;
        }
        Ok(response)
    }
}

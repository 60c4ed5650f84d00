use async_trait::async_trait;

use super::{MiddlewareError, Request, Response};

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    // 요청 처리. 체인을 중단하려면 응답을 담은 에러를 반환한다.
    async fn handle_request(&self, req: Request) -> Result<Request, MiddlewareError>;

    // 응답 처리
    async fn handle_response(&self, res: Response) -> Result<Response, MiddlewareError>;

    // 미들웨어 이름 (로깅 및 진단용)
    fn name(&self) -> &str;
}

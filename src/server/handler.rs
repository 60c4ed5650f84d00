use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioTimer;
use tracing::{debug, error};
use uuid::Uuid;

use crate::logging::{log_request, RequestLog};
use crate::middleware;
use crate::provider::Snapshot;
use crate::rule::RequestMeta;

/// 엔트리포인트 하나의 HTTP 요청 처리기입니다.
///
/// 요청마다 현재 스냅샷을 원자적 로드 한 번으로 읽습니다. 진행 중인
/// 요청은 진입 시점의 스냅샷을 계속 사용하고, 스왑으로 취소되지 않습니다.
pub struct RequestHandler {
    entry_point: String,
    published: Arc<ArcSwap<Snapshot>>,
    read_timeout: std::time::Duration,
}

impl RequestHandler {
    pub fn new(
        entry_point: String,
        published: Arc<ArcSwap<Snapshot>>,
        read_timeout: std::time::Duration,
    ) -> Self {
        Self {
            entry_point,
            published,
            read_timeout,
        }
    }

    pub async fn handle_request(
        &self,
        req: Request<Incoming>,
        client_ip: Option<IpAddr>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let start = Instant::now();
        let snapshot = self.published.load_full();

        let mut log = RequestLog::new(Uuid::new_v4().to_string(), &self.entry_point);
        log.with_request(&req);

        let handler = match snapshot.http.get(&self.entry_point) {
            Some(handler) => handler,
            None => {
                return Ok(finish(not_found_response(), &mut log, start));
            }
        };

        // 1. 라우팅: 우선순위 순서의 첫 매칭 라우트
        let matched = {
            let meta = RequestMeta::from_request(&req, client_ip);
            handler.route(&meta).map(|route| {
                (route.name.clone(), route.chain.clone(), route.service.clone())
            })
        };

        let (router_name, chain, service) = match matched {
            Some(matched) => matched,
            None => {
                debug!(entry_point = %self.entry_point, "매칭되는 라우터 없음");
                return Ok(finish(not_found_response(), &mut log, start));
            }
        };
        log.with_router(&router_name);

        // 2. 요청 본문 수집 (미들웨어와 서비스는 버퍼링된 본문을 다룬다)
        let (parts, body) = req.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                error!(error = %e, "요청 본문 수집 실패");
                log.with_error(&e);
                return Ok(finish(bad_request_response(), &mut log, start));
            }
        };
        let buffered = Request::from_parts(parts, Full::new(body_bytes));

        // 3. 요청 미들웨어 체인 (첫 번째 미들웨어가 가장 바깥쪽)
        let buffered = match chain.handle_request(buffered).await {
            Ok(buffered) => buffered,
            Err(e) => {
                debug!(router = %router_name, error = %e, "미들웨어가 체인을 중단");
                log.with_error(&e);
                return Ok(finish(middleware::error_response(e), &mut log, start));
            }
        };

        // 4. 서비스 (로드밸런서/미러링/가중치 그룹)
        let response = service.handle(buffered, &mut log).await;

        // 5. 응답 미들웨어 체인 (역순)
        let response = match chain.handle_response(response).await {
            Ok(response) => response,
            Err(e) => {
                error!(router = %router_name, error = %e, "응답 미들웨어 처리 실패");
                log.with_error(&e);
                middleware::error_response(e)
            }
        };

        Ok(finish(response, &mut log, start))
    }

    pub async fn handle_connection<I>(
        &self,
        io: I,
        client_ip: Option<IpAddr>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    {
        http1::Builder::new()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout)
            .serve_connection(io, service_fn(|req| self.handle_request(req, client_ip)))
            .await
            .map_err(|e| e.into())
    }
}

fn finish(
    response: Response<Full<Bytes>>,
    log: &mut RequestLog,
    start: Instant,
) -> Response<Full<Bytes>> {
    log.with_response(response.status());
    log.duration_ms = start.elapsed().as_millis() as u64;
    log_request(log);
    response
}

fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("404 page not found")))
        .unwrap_or_else(|_| {
            let mut res = Response::new(Full::new(Bytes::from("404 page not found")));
            *res.status_mut() = StatusCode::NOT_FOUND;
            res
        })
}

fn bad_request_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from("Bad Request")))
        .unwrap_or_else(|_| {
            let mut res = Response::new(Full::new(Bytes::from("Bad Request")));
            *res.status_mut() = StatusCode::BAD_REQUEST;
            res
        })
}

//! 업스트림 헬스 체크 루프입니다.
//!
//! 헬스 체크가 설정된 서버마다 태스크 하나가 주기적으로 GET을 보내고,
//! 결과에 따라 서버의 가용 플래그를 갱신합니다. 루프는 스냅샷이 소유하며,
//! 스냅샷 교체 시 취소 신호를 받습니다.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::{StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::balancer::ServerEntry;

/// 서버 하나에 대한 헬스 체크 명세입니다. 빌드 패스가 수집하고,
/// 스냅샷 발행 시점에 태스크로 변환됩니다.
#[derive(Debug)]
pub struct HealthCheckSpec {
    pub service: String,
    pub server: Arc<ServerEntry>,
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// 스냅샷 하나가 소유하는 헬스 체크 태스크 집합입니다.
pub struct HealthMonitor {
    cancel: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl HealthMonitor {
    /// 명세마다 태스크 하나를 시작합니다.
    pub fn spawn(specs: Vec<HealthCheckSpec>) -> Self {
        let (cancel, _) = watch::channel(false);
        let handles = specs
            .into_iter()
            .map(|spec| {
                let cancel_rx = cancel.subscribe();
                tokio::spawn(run_loop(spec, cancel_rx))
            })
            .collect();

        Self { cancel, handles }
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// 모든 루프에 취소 신호를 보내고 태스크를 중단합니다.
    ///
    /// 이전 스냅샷이 교체될 때 호출됩니다. 요청 경로에서는 호출되지 않습니다.
    pub fn shutdown(&self) {
        let _ = self.cancel.send(true);
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_loop(spec: HealthCheckSpec, mut cancel: watch::Receiver<bool>) {
    let client = Client::builder(TokioExecutor::new()).build::<_, Empty<Bytes>>(HttpConnector::new());

    let mut ticker = tokio::time::interval(spec.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!(
        service = %spec.service,
        server = %spec.server.url,
        interval_secs = spec.interval.as_secs(),
        "헬스 체크 루프 시작"
    );

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                debug!(service = %spec.service, server = %spec.server.url, "헬스 체크 루프 종료");
                break;
            }
            _ = ticker.tick() => {
                let healthy = check_once(&client, &spec).await;
                if spec.server.set_healthy(healthy) {
                    if healthy {
                        info!(service = %spec.service, server = %spec.server.url, "서버 복구, 로테이션에 추가");
                    } else {
                        warn!(service = %spec.service, server = %spec.server.url, "서버 다운, 로테이션에서 제거");
                    }
                }
            }
        }
    }
}

/// 헬스 체크 한 번을 수행합니다. 2xx/3xx 응답만 정상으로 봅니다.
async fn check_once(client: &Client<HttpConnector, Empty<Bytes>>, spec: &HealthCheckSpec) -> bool {
    let url = match health_url(&spec.server.url, &spec.path) {
        Some(url) => url,
        None => return false,
    };

    let request = match hyper::Request::builder()
        .method(hyper::Method::GET)
        .uri(url)
        .body(Empty::<Bytes>::new())
    {
        Ok(request) => request,
        Err(e) => {
            warn!(service = %spec.service, error = %e, "헬스 체크 요청 생성 실패");
            return false;
        }
    };

    match timeout(spec.timeout, client.request(request)).await {
        Ok(Ok(response)) => is_healthy_status(response.status()),
        Ok(Err(e)) => {
            debug!(service = %spec.service, server = %spec.server.url, error = %e, "헬스 체크 요청 실패");
            false
        }
        Err(_) => {
            debug!(
                service = %spec.service,
                server = %spec.server.url,
                timeout_secs = spec.timeout.as_secs(),
                "헬스 체크 타임아웃"
            );
            false
        }
    }
}

fn health_url(base: &Uri, path: &str) -> Option<Uri> {
    let scheme = base.scheme_str().unwrap_or("http");
    let authority = base.authority()?;
    format!("{}://{}{}", scheme, authority, path).parse().ok()
}

fn is_healthy_status(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_status_range() {
        assert!(is_healthy_status(StatusCode::OK));
        assert!(is_healthy_status(StatusCode::MOVED_PERMANENTLY));
        assert!(!is_healthy_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_healthy_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_health_url_join() {
        let base: Uri = "http://127.0.0.1:8080".parse().unwrap();
        let url = health_url(&base, "/health").unwrap();
        assert_eq!(url.to_string(), "http://127.0.0.1:8080/health");
    }

    #[tokio::test]
    async fn test_monitor_shutdown_aborts_tasks() {
        let entry = Arc::new(ServerEntry::new("http://127.0.0.1:1".parse().unwrap(), 1));
        let monitor = HealthMonitor::spawn(vec![HealthCheckSpec {
            service: "test@file".to_string(),
            server: entry,
            path: "/health".to_string(),
            interval: Duration::from_secs(3600),
            timeout: Duration::from_secs(1),
        }]);

        assert_eq!(monitor.task_count(), 1);
        monitor.shutdown();
        // 종료 후 태스크가 더 이상 실행되지 않아야 한다
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

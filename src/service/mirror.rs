use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use crate::logging::RequestLog;
use crate::middleware::Request;

use super::{collect_full, rebuild_request, ServiceHandler};

/// 미러 사본의 동시 전송 상한. 초과분은 차단 없이 버려진다.
const MIRROR_QUEUE_LIMIT: usize = 64;

/// 미러 대상 하나입니다.
pub struct MirrorTarget {
    name: String,
    handler: Arc<ServiceHandler>,
    /// 샘플링 비율 (0-100)
    percent: u32,
    total: AtomicU64,
    sampled: AtomicU64,
    permits: Arc<Semaphore>,
    dropped: AtomicU64,
}

impl MirrorTarget {
    pub fn new(name: String, handler: Arc<ServiceHandler>, percent: u32) -> Self {
        Self {
            name,
            handler,
            percent: percent.min(100),
            total: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
            permits: Arc::new(Semaphore::new(MIRROR_QUEUE_LIMIT)),
            dropped: AtomicU64::new(0),
        }
    }

    /// percent 비율이 유지되도록 이번 요청을 샘플링할지 결정합니다.
    fn should_sample(&self) -> bool {
        let total = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        let sampled = self.sampled.load(Ordering::Relaxed);

        if sampled * 100 < self.percent as u64 * total {
            self.sampled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// 큐가 가득 차서 버린 샘플 수
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 미러링 서비스 핸들러입니다.
///
/// 본 요청은 primary가 처리하고, 각 미러는 샘플링된 사본을 받습니다.
/// 미러 응답은 버려지며, 전송 한도를 넘으면 primary를 막지 않고
/// 샘플을 버린 뒤 카운트만 올립니다.
pub struct MirrorHandler {
    name: String,
    primary: Arc<ServiceHandler>,
    mirrors: Vec<MirrorTarget>,
}

impl MirrorHandler {
    pub fn new(name: String, primary: Arc<ServiceHandler>, mirrors: Vec<MirrorTarget>) -> Self {
        Self {
            name,
            primary,
            mirrors,
        }
    }

    pub fn mirrors(&self) -> &[MirrorTarget] {
        &self.mirrors
    }

    pub async fn handle(&self, req: Request, log: &mut RequestLog) -> Response<Full<Bytes>> {
        let (parts, body) = req.into_parts();
        let body_bytes = collect_full(body).await;

        for mirror in &self.mirrors {
            if !mirror.should_sample() {
                continue;
            }

            match mirror.permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    let handler = mirror.handler.clone();
                    let copy = rebuild_request(&parts, &body_bytes);
                    let mirror_name = mirror.name.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let mut mirror_log =
                            RequestLog::new(Uuid::new_v4().to_string(), "mirror");
                        // 미러 응답은 버린다
                        let _ = handler.handle(copy, &mut mirror_log).await;
                        debug!(mirror = %mirror_name, "미러 사본 전송 완료");
                    });
                }
                Err(_) => {
                    mirror.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        service = %self.name,
                        mirror = %mirror.name,
                        "미러 큐 가득 참, 샘플 버림"
                    );
                }
            }
        }

        let primary_req = rebuild_request(&parts, &body_bytes);
        self.primary.handle(primary_req, log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(percent: u32) -> MirrorTarget {
        let handler = Arc::new(ServiceHandler::Unavailable {
            name: "mirror@file".to_string(),
        });
        MirrorTarget::new("mirror@file".to_string(), handler, percent)
    }

    #[test]
    fn test_sampling_honors_percent() {
        let mirror = target(50);

        let sampled = (0..100).filter(|_| mirror.should_sample()).count();
        assert_eq!(sampled, 50, "50%면 100번 중 50번 샘플링되어야 함");
    }

    #[test]
    fn test_full_percent_samples_everything() {
        let mirror = target(100);
        assert!((0..10).all(|_| mirror.should_sample()));
    }

    #[test]
    fn test_zero_percent_samples_nothing() {
        let mirror = target(0);
        assert!((0..10).all(|_| !mirror.should_sample()));
    }
}

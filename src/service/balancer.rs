use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, COOKIE, SET_COOKIE};
use hyper::{Response, StatusCode, Uri};
use tracing::{debug, warn};

use crate::config::{BalancerMethod, Stickiness};
use crate::logging::RequestLog;
use crate::middleware::Request;
use crate::proxy::{self, ProxyClient, ProxyError};

use super::{collect_full, rebuild_request};

/// 업스트림 서버 하나의 상태입니다.
///
/// `healthy` 플래그는 헬스 체크 태스크가 갱신하고, 밸런서는 읽기만 합니다.
#[derive(Debug)]
pub struct ServerEntry {
    pub url: Uri,
    /// 스티키 쿠키에 기록되는 불투명 식별자
    pub id: String,
    pub weight: u32,
    healthy: AtomicBool,
    inflight: AtomicUsize,
}

impl ServerEntry {
    pub fn new(url: Uri, weight: u32) -> Self {
        let id = URL_SAFE_NO_PAD.encode(url.to_string());
        Self {
            url,
            id,
            weight: weight.max(1),
            healthy: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// 헬스 체크 결과를 반영합니다. 상태가 바뀌면 true를 반환합니다.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::Relaxed) != healthy
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }
}

/// 서버 풀에 대한 로드밸런서입니다.
pub struct LoadBalancer {
    name: String,
    entries: Vec<Arc<ServerEntry>>,
    method: BalancerMethod,
    stickiness: Option<Stickiness>,
    pass_host_header: bool,
    client: Arc<ProxyClient>,
    counter: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(
        name: String,
        entries: Vec<Arc<ServerEntry>>,
        method: BalancerMethod,
        stickiness: Option<Stickiness>,
        pass_host_header: bool,
        client: Arc<ProxyClient>,
    ) -> Self {
        Self {
            name,
            entries,
            method,
            stickiness,
            pass_host_header,
            client,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn entries(&self) -> &[Arc<ServerEntry>] {
        &self.entries
    }

    /// 요청을 처리합니다.
    ///
    /// 연결 실패는 다음 서버로 한 바퀴 재시도하고, 타임아웃 등 나머지
    /// 오류는 즉시 502로 변환합니다. 가용 서버가 없으면 503입니다.
    pub async fn handle(&self, req: Request, log: &mut RequestLog) -> Response<Full<Bytes>> {
        let pinned = self
            .stickiness
            .as_ref()
            .and_then(|s| cookie_value(&req, &s.cookie_name));

        let candidates = self.candidates(pinned.as_deref());
        if candidates.is_empty() {
            warn!(service = %self.name, "가용 서버 없음");
            return unavailable_response(&self.name);
        }

        let (parts, body) = req.into_parts();
        let body_bytes = collect_full(body).await;

        let mut last_error: Option<ProxyError> = None;
        for entry in &candidates {
            let attempt = rebuild_request(&parts, &body_bytes);

            entry.inflight.fetch_add(1, Ordering::Relaxed);
            let result = self
                .client
                .forward(&entry.url, attempt, self.pass_host_header)
                .await;
            entry.inflight.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(mut response) => {
                    log.with_backend(&entry.url.to_string());
                    if let Some(stickiness) = &self.stickiness {
                        set_sticky_cookie(&mut response, &stickiness.cookie_name, &entry.id);
                    }
                    return response;
                }
                Err(e) if e.is_retryable() => {
                    debug!(service = %self.name, backend = %entry.url, error = %e, "연결 실패, 다음 서버 시도");
                    last_error = Some(e);
                }
                Err(e) => {
                    log.with_backend(&entry.url.to_string());
                    log.with_error(&e);
                    return proxy::error_response(&e);
                }
            }
        }

        match last_error {
            Some(e) => {
                log.with_error(&e);
                proxy::error_response(&e)
            }
            None => unavailable_response(&self.name),
        }
    }

    /// 시도 순서대로 후보 서버를 반환합니다.
    ///
    /// 스티키 쿠키로 고정된 서버가 살아 있으면 맨 앞에 둡니다.
    fn candidates(&self, pinned: Option<&str>) -> Vec<Arc<ServerEntry>> {
        let healthy: Vec<Arc<ServerEntry>> = self
            .entries
            .iter()
            .filter(|e| e.is_healthy())
            .cloned()
            .collect();
        if healthy.is_empty() {
            return healthy;
        }

        if let Some(id) = pinned {
            if let Some(pos) = healthy.iter().position(|e| e.id == id) {
                let mut ordered = healthy.clone();
                let pinned_entry = ordered.remove(pos);
                ordered.insert(0, pinned_entry);
                return ordered;
            }
        }

        let start = match self.method {
            BalancerMethod::Wrr => self.weighted_index(&healthy),
            BalancerMethod::Drr => self.least_inflight_index(&healthy),
        };

        let mut ordered = Vec::with_capacity(healthy.len());
        for offset in 0..healthy.len() {
            ordered.push(healthy[(start + offset) % healthy.len()].clone());
        }
        ordered
    }

    /// 가중 라운드로빈: 카운터를 가중치 합으로 나눈 위치의 서버를 고릅니다.
    fn weighted_index(&self, healthy: &[Arc<ServerEntry>]) -> usize {
        let total: usize = healthy.iter().map(|e| e.weight as usize).sum();
        if total == 0 {
            return 0;
        }

        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for (idx, entry) in healthy.iter().enumerate() {
            let weight = entry.weight as usize;
            if slot < weight {
                return idx;
            }
            slot -= weight;
        }
        0
    }

    /// 동적 라운드로빈: 진행 중 요청이 가장 적은 서버를 고릅니다.
    fn least_inflight_index(&self, healthy: &[Arc<ServerEntry>]) -> usize {
        healthy
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.inflight())
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

/// 가용 서버가 없을 때의 503 응답입니다.
pub fn unavailable_response(service: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(Full::new(Bytes::from(format!(
            "서비스 {}에 가용 서버가 없습니다",
            service
        ))))
        .unwrap_or_else(|_| {
            let mut res = Response::new(Full::new(Bytes::from("Service Unavailable")));
            *res.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            res
        })
}

fn cookie_value(req: &Request, name: &str) -> Option<String> {
    let cookies = req.headers().get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn set_sticky_cookie(response: &mut Response<Full<Bytes>>, name: &str, id: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("{}={}; Path=/; HttpOnly", name, id)) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, weight: u32) -> Arc<ServerEntry> {
        Arc::new(ServerEntry::new(url.parse().unwrap(), weight))
    }

    fn balancer(entries: Vec<Arc<ServerEntry>>, method: BalancerMethod) -> LoadBalancer {
        LoadBalancer::new(
            "test@file".to_string(),
            entries,
            method,
            None,
            true,
            Arc::new(ProxyClient::new(std::time::Duration::from_secs(5))),
        )
    }

    #[test]
    fn test_wrr_rotates_over_healthy_servers() {
        let a = entry("http://127.0.0.1:8081", 1);
        let b = entry("http://127.0.0.1:8082", 1);
        let lb = balancer(vec![a.clone(), b.clone()], BalancerMethod::Wrr);

        let first = lb.candidates(None)[0].url.to_string();
        let second = lb.candidates(None)[0].url.to_string();
        assert_ne!(first, second, "라운드로빈은 서버를 번갈아 선택해야 함");
    }

    #[test]
    fn test_wrr_respects_weights() {
        let a = entry("http://127.0.0.1:8081", 3);
        let b = entry("http://127.0.0.1:8082", 1);
        let lb = balancer(vec![a.clone(), b.clone()], BalancerMethod::Wrr);

        let mut first_count = 0;
        for _ in 0..4 {
            if lb.candidates(None)[0].url == a.url {
                first_count += 1;
            }
        }
        assert_eq!(first_count, 3, "가중치 3:1이면 4번 중 3번 선택되어야 함");
    }

    #[test]
    fn test_unhealthy_servers_removed_from_rotation() {
        let a = entry("http://127.0.0.1:8081", 1);
        let b = entry("http://127.0.0.1:8082", 1);
        b.set_healthy(false);
        let lb = balancer(vec![a.clone(), b], BalancerMethod::Wrr);

        for _ in 0..4 {
            assert_eq!(lb.candidates(None)[0].url, a.url);
        }
    }

    #[test]
    fn test_no_healthy_servers_yields_empty_candidates() {
        let a = entry("http://127.0.0.1:8081", 1);
        a.set_healthy(false);
        let lb = balancer(vec![a], BalancerMethod::Wrr);

        assert!(lb.candidates(None).is_empty());
    }

    #[test]
    fn test_drr_prefers_least_inflight() {
        let a = entry("http://127.0.0.1:8081", 1);
        let b = entry("http://127.0.0.1:8082", 1);
        a.inflight.store(5, Ordering::Relaxed);
        let lb = balancer(vec![a, b.clone()], BalancerMethod::Drr);

        assert_eq!(lb.candidates(None)[0].url, b.url);
    }

    #[test]
    fn test_pinned_server_first() {
        let a = entry("http://127.0.0.1:8081", 1);
        let b = entry("http://127.0.0.1:8082", 1);
        let pinned_id = b.id.clone();
        let lb = balancer(vec![a, b.clone()], BalancerMethod::Wrr);

        for _ in 0..3 {
            assert_eq!(lb.candidates(Some(&pinned_id))[0].url, b.url);
        }
    }

    #[test]
    fn test_unavailable_response_is_503() {
        let res = unavailable_response("foo-service@file");
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

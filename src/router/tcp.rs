//! SNI 기반 TCP 라우팅입니다.
//!
//! TCP 라우터는 `HostSNI` 규칙만 사용할 수 있고, 매칭된 연결은 업스트림으로
//! 양방향 바이트 복사됩니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::{RuntimeConfiguration, Status};
use crate::rule::{effective_priority, CompiledRule};

/// TCP 업스트림 풀입니다. 라운드로빈으로 연결을 분배합니다.
pub struct TcpServiceHandler {
    name: String,
    servers: Vec<String>,
    counter: AtomicUsize,
}

impl TcpServiceHandler {
    pub fn new(name: String, servers: Vec<String>) -> Self {
        Self {
            name,
            servers,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// 인바운드 연결을 업스트림으로 릴레이합니다.
    ///
    /// 연결 실패는 다음 서버로 한 바퀴 재시도하고, 모두 실패하면 연결을
    /// 그대로 닫습니다.
    pub async fn handle(&self, mut inbound: TcpStream) {
        if self.servers.is_empty() {
            warn!(service = %self.name, "TCP 서버 없음, 연결 종료");
            return;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        for offset in 0..self.servers.len() {
            let address = &self.servers[(start + offset) % self.servers.len()];
            match TcpStream::connect(address).await {
                Ok(mut outbound) => {
                    debug!(service = %self.name, backend = %address, "TCP 릴레이 시작");
                    if let Err(e) =
                        tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await
                    {
                        debug!(service = %self.name, backend = %address, error = %e, "TCP 릴레이 종료");
                    }
                    return;
                }
                Err(e) => {
                    warn!(service = %self.name, backend = %address, error = %e, "TCP 연결 실패, 다음 서버 시도");
                }
            }
        }

        warn!(service = %self.name, "모든 TCP 서버 연결 실패, 연결 종료");
    }
}

/// TCP 라우트 하나입니다.
pub struct TcpRouteEntry {
    pub name: String,
    pub rule: CompiledRule,
    pub priority: i64,
    pub service: Arc<TcpServiceHandler>,
}

/// 엔트리포인트 하나의 TCP 라우터 트리입니다. SNI로 키잉됩니다.
#[derive(Default)]
pub struct TcpRouterTree {
    routes: Vec<TcpRouteEntry>,
}

impl TcpRouterTree {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[TcpRouteEntry] {
        &self.routes
    }

    /// SNI와 매칭되는 첫 번째 라우트를 반환합니다.
    pub fn route(&self, sni: Option<&str>) -> Option<&TcpRouteEntry> {
        self.routes.iter().find(|entry| entry.rule.matches_sni(sni))
    }
}

/// 엔트리포인트별 TCP 라우터 트리를 빌드합니다.
pub fn build_tcp_handlers(
    entry_points: &[String],
    runtime: &mut RuntimeConfiguration,
) -> HashMap<String, Arc<TcpRouterTree>> {
    // 서비스 핸들러 먼저 빌드
    let mut service_handlers: HashMap<String, Arc<TcpServiceHandler>> = HashMap::new();
    let mut service_names: Vec<String> = runtime.tcp_services.keys().cloned().collect();
    service_names.sort();

    for name in service_names {
        let service = runtime.tcp_services[&name].service.clone();
        let lb = match &service.load_balancer {
            Some(lb) => lb.clone(),
            None => {
                if let Some(info) = runtime.tcp_services.get_mut(&name) {
                    info.add_err("TCP 서비스 본문(loadBalancer) 누락".to_string());
                }
                continue;
            }
        };

        let mut servers = Vec::with_capacity(lb.servers.len());
        for server in &lb.servers {
            if server.address.contains(':') {
                servers.push(server.address.clone());
            } else {
                if let Some(info) = runtime.tcp_services.get_mut(&name) {
                    info.add_warning(format!(
                        "유효하지 않은 TCP 서버 주소 '{}' 건너뜀 (host:port 필요)",
                        server.address
                    ));
                }
            }
        }

        if servers.is_empty() {
            if let Some(info) = runtime.tcp_services.get_mut(&name) {
                info.add_warning("TCP 서버 목록이 비어 있음".to_string());
            }
        }

        service_handlers.insert(name.clone(), Arc::new(TcpServiceHandler::new(name, servers)));
    }

    // 라우터 빌드
    let mut built_routes: Vec<(Vec<String>, String, CompiledRule, i64, Arc<TcpServiceHandler>)> =
        Vec::new();
    let mut router_names: Vec<String> = runtime.tcp_routers.keys().cloned().collect();
    router_names.sort();

    for name in router_names {
        let router = runtime.tcp_routers[&name].router.clone();

        let rule = match CompiledRule::compile_tcp(&router.rule) {
            Ok(rule) => rule,
            Err(e) => {
                if let Some(info) = runtime.tcp_routers.get_mut(&name) {
                    info.add_err(format!("규칙 컴파일 실패: {}", e));
                }
                continue;
            }
        };

        let service_disabled = runtime
            .tcp_services
            .get(&router.service)
            .map(|info| info.status == Status::Disabled)
            .unwrap_or(true);
        let service = match (service_handlers.get(&router.service), service_disabled) {
            (Some(handler), false) => handler.clone(),
            _ => {
                if let Some(info) = runtime.tcp_routers.get_mut(&name) {
                    info.add_err(format!("알 수 없거나 비활성화된 TCP 서비스: {}", router.service));
                }
                continue;
            }
        };

        let targets: Vec<String> = if router.entry_points.is_empty() {
            entry_points.to_vec()
        } else {
            router
                .entry_points
                .iter()
                .filter(|ep| entry_points.contains(ep))
                .cloned()
                .collect()
        };

        let priority = effective_priority(router.priority, &router.rule);
        built_routes.push((targets, name, rule, priority, service));
    }

    let mut trees: HashMap<String, Vec<TcpRouteEntry>> = entry_points
        .iter()
        .map(|ep| (ep.clone(), Vec::new()))
        .collect();

    for (targets, name, rule, priority, service) in built_routes {
        for target in targets {
            if let Some(routes) = trees.get_mut(&target) {
                routes.push(TcpRouteEntry {
                    name: name.clone(),
                    rule: rule.clone(),
                    priority,
                    service: service.clone(),
                });
            }
        }
    }

    trees
        .into_iter()
        .map(|(entry_point, mut routes)| {
            routes.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| b.rule.rule().len().cmp(&a.rule.rule().len()))
                    .then_with(|| a.name.cmp(&b.name))
            });
            (entry_point, Arc::new(TcpRouterTree { routes }))
        })
        .collect()
}

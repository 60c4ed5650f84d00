//! 설정 집계기입니다.
//!
//! 프로바이더별 마지막 제출을 보관하고, 디바운스 윈도우가 지나면 하나의
//! 전역 설정으로 병합해 런타임 설정과 핸들러 트리를 빌드한 뒤 원자적으로
//! 스왑합니다. 이전 스냅샷이 소유한 헬스 체크 태스크는 교체 시점에
//! 취소됩니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::config::{Configuration, RuntimeConfiguration};
use crate::middleware::MiddlewareBuilder;
use crate::proxy::ProxyClient;
use crate::router::{
    build_entry_point_handlers, build_tcp_handlers, EntryPointHandler, TcpRouterTree,
};
use crate::service::{HealthMonitor, ServiceManager};
use crate::tls;

use super::ConfigMessage;

/// 발행된 스냅샷 하나입니다.
///
/// 발행 이후 불변이며, 자신이 띄운 헬스 체크 태스크를 소유합니다.
/// 진행 중인 요청은 진입 시점의 스냅샷을 계속 사용합니다.
pub struct Snapshot {
    /// 단조 증가하는 세대 번호
    pub generation: u64,
    pub runtime: Arc<RuntimeConfiguration>,
    /// 엔트리포인트별 HTTP 핸들러 (원자적 스왑의 단위)
    pub http: HashMap<String, Arc<EntryPointHandler>>,
    /// 엔트리포인트별 TCP 라우터 트리
    pub tcp: HashMap<String, Arc<TcpRouterTree>>,
    /// 프로바이더가 공급한 동적 인증서의 어셉터
    pub dynamic_tls: Option<TlsAcceptor>,
    health: Option<HealthMonitor>,
}

impl Snapshot {
    /// 첫 설정이 도착하기 전의 빈 스냅샷입니다.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            runtime: Arc::new(RuntimeConfiguration::default()),
            http: HashMap::new(),
            tcp: HashMap::new(),
            dynamic_tls: None,
            health: None,
        }
    }

    pub fn health_task_count(&self) -> usize {
        self.health.as_ref().map(|h| h.task_count()).unwrap_or(0)
    }

    /// 이 스냅샷이 소유한 백그라운드 태스크를 취소합니다.
    ///
    /// 새 스냅샷이 발행된 직후 호출되며, 요청 경로에서는 호출되지 않습니다.
    pub fn teardown(&self) {
        if let Some(health) = &self.health {
            health.shutdown();
        }
    }
}

/// 프로바이더 제출을 병합해 스냅샷을 발행하는 집계기입니다.
pub struct ConfigAggregator {
    throttle: Duration,
    entry_points: Vec<String>,
    client: Arc<ProxyClient>,
    published: Arc<ArcSwap<Snapshot>>,
    /// 프로바이더별 마지막 제출 (프로바이더 내에서는 last-writer-wins)
    pending: HashMap<String, Configuration>,
    last_merged: Option<Configuration>,
    generation: u64,
}

impl ConfigAggregator {
    pub fn new(
        throttle: Duration,
        entry_points: Vec<String>,
        client: Arc<ProxyClient>,
        published: Arc<ArcSwap<Snapshot>>,
    ) -> Self {
        Self {
            throttle,
            entry_points,
            client,
            published,
            pending: HashMap::new(),
            last_merged: None,
            generation: 0,
        }
    }

    /// 집계 루프입니다.
    ///
    /// 제출이 도착할 때마다 디바운스 타이머를 다시 시작하고, 타이머가
    /// 만료되면 병합-빌드-스왑을 수행합니다. 채널이 닫히면 종료합니다.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ConfigMessage>) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(message) => {
                            if message.configuration.is_empty() {
                                debug!(provider = %message.provider_name, "빈 설정 무시");
                                continue;
                            }
                            debug!(provider = %message.provider_name, "설정 제출 수신");
                            self.pending.insert(message.provider_name, message.configuration);
                            deadline = Some(Instant::now() + self.throttle);
                        }
                        None => {
                            info!("모든 프로바이더 종료, 집계기 중지");
                            break;
                        }
                    }
                }
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    deadline = None;
                    self.apply();
                }
            }
        }
    }

    /// 프로바이더 제출 하나를 직접 반영합니다.
    ///
    /// 채널을 거치지 않는 임베딩/테스트 경로입니다. 프로바이더 내에서는
    /// 마지막 제출이 이전 제출을 대체합니다.
    pub fn submit(&mut self, provider_name: &str, configuration: Configuration) {
        self.pending.insert(provider_name.to_string(), configuration);
    }

    /// 보류 중인 제출을 병합해 새 스냅샷을 발행합니다.
    ///
    /// 병합 결과가 직전 적용분과 동일하면 재빌드를 건너뛰고 세대 번호도
    /// 올리지 않습니다.
    pub fn apply(&mut self) {
        let merged = Configuration::merge(&self.pending);

        if self.last_merged.as_ref() == Some(&merged) {
            debug!(generation = self.generation, "병합 결과가 동일, 재빌드 생략");
            return;
        }

        let snapshot = self.build_snapshot(&merged);
        let generation = snapshot.generation;
        let router_count = snapshot.runtime.routers.len();
        let error_count = snapshot.runtime.error_count();

        let old = self.published.swap(Arc::new(snapshot));
        // 이전 스냅샷이 소유한 헬스 체크 루프를 해제한다
        old.teardown();

        self.last_merged = Some(merged);

        info!(
            generation,
            routers = router_count,
            errors = error_count,
            "새 스냅샷 발행"
        );
    }

    /// 병합된 설정으로 런타임 설정과 핸들러 트리를 빌드합니다.
    ///
    /// 빌드 패스가 요소별 Status/Err/UsedBy를 채우는 검증 패스를 겸합니다.
    pub fn build_snapshot(&mut self, merged: &Configuration) -> Snapshot {
        let mut runtime = RuntimeConfiguration::new(merged);

        let service_manager =
            ServiceManager::new(merged.http.services.clone(), self.client.clone());
        let built = service_manager.build_all(&mut runtime);

        let middleware_builder = MiddlewareBuilder::new(merged.http.middlewares.clone());
        middleware_builder.validate_all(&mut runtime);

        let http = build_entry_point_handlers(
            &self.entry_points,
            &mut runtime,
            &built.handlers,
            &middleware_builder,
            &merged.tls.options,
        );
        let tcp = build_tcp_handlers(&self.entry_points, &mut runtime);

        let dynamic_tls = tls::build_dynamic_acceptor(&merged.tls);

        let health = if built.health_specs.is_empty() {
            None
        } else {
            Some(HealthMonitor::spawn(built.health_specs))
        };

        self.generation += 1;
        Snapshot {
            generation: self.generation,
            runtime: Arc::new(runtime),
            http,
            tcp,
            dynamic_tls,
            health,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

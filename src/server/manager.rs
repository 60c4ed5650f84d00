use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::config::RuntimeConfiguration;
use crate::provider::{ConfigAggregator, FileProvider, Provider, Snapshot};
use crate::proxy::ProxyClient;
use crate::settings::Settings;

use super::listener::EntryPointListener;
use super::{Error, Result};

/// 프로바이더, 집계기, 엔트리포인트 리스너를 엮는 서버 매니저입니다.
pub struct ServerManager {
    settings: Settings,
    published: Arc<ArcSwap<Snapshot>>,
}

impl ServerManager {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            published: Arc::new(ArcSwap::from_pointee(Snapshot::empty())),
        }
    }

    /// 발행 포인터입니다. 리스너와 테스트가 공유합니다.
    pub fn published(&self) -> Arc<ArcSwap<Snapshot>> {
        self.published.clone()
    }

    /// 현재 런타임 설정의 읽기 전용 뷰입니다 (외부 API/UI 렌더링용).
    pub fn current_runtime(&self) -> Arc<RuntimeConfiguration> {
        self.published.load().runtime.clone()
    }

    /// 서버를 실행합니다. 리스너가 도는 동안 반환하지 않습니다.
    pub async fn start(self) -> Result<()> {
        let (config_tx, config_rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        // 프로바이더 태스크
        if let Some(file_settings) = &self.settings.providers.file {
            let provider = Box::new(FileProvider::new(file_settings));
            let tx = config_tx.clone();
            let stop = stop_rx.clone();
            tokio::spawn(async move {
                provider.provide(tx, stop).await;
            });
        } else {
            info!("설정된 프로바이더 없음, 동적 설정은 비활성 상태로 시작");
        }

        // 집계기 태스크
        let mut entry_point_names: Vec<String> =
            self.settings.entry_points.keys().cloned().collect();
        entry_point_names.sort();

        let client = Arc::new(ProxyClient::new(Duration::from_secs(
            self.settings.upstream_timeout.max(1),
        )));
        let aggregator = ConfigAggregator::new(
            Duration::from_secs(self.settings.providers.throttle),
            entry_point_names,
            client,
            self.published.clone(),
        );
        tokio::spawn(aggregator.run(config_rx));

        // 엔트리포인트 리스너
        let mut tasks = Vec::with_capacity(self.settings.entry_points.len());
        for (name, entry_point) in &self.settings.entry_points {
            let listener =
                EntryPointListener::bind(name, entry_point, self.published.clone()).await?;
            tasks.push(tokio::spawn(listener.run()));
        }

        info!(listeners = tasks.len(), "모든 엔트리포인트 리스너 시작");

        // 리스너는 정상 동작 중에는 반환하지 않는다
        for task in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "리스너 종료");
                    let _ = stop_tx.send(true);
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "리스너 태스크 실패");
                    let _ = stop_tx.send(true);
                    return Err(Error::Server {
                        message: format!("리스너 태스크 실패: {}", e),
                        source: None,
                    });
                }
            }
        }

        drop(config_tx);
        Ok(())
    }
}

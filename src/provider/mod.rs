//! 동적 설정 프로바이더 계약과 집계기입니다.
//!
//! 프로바이더는 공유 채널로 `ConfigMessage`를 발행하고, 전용 stop 채널로
//! 중지됩니다. 프로바이더가 자체적으로 변경을 뭉쳐 보내는 것이 권장되지만,
//! 정확성은 집계기의 디바운스에만 의존합니다.

mod aggregator;
pub mod file;

pub use aggregator::{ConfigAggregator, Snapshot};
pub use file::FileProvider;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::config::Configuration;

/// 프로바이더가 집계기로 보내는 메시지입니다.
#[derive(Debug, Clone)]
pub struct ConfigMessage {
    pub provider_name: String,
    pub configuration: Configuration,
}

/// 동적 설정 공급자 계약입니다.
#[async_trait]
pub trait Provider: Send + 'static {
    fn name(&self) -> &str;

    /// 설정을 공유 채널로 발행합니다. stop 신호를 받으면 반환합니다.
    async fn provide(self: Box<Self>, tx: mpsc::Sender<ConfigMessage>, stop: watch::Receiver<bool>);
}

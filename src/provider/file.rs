//! 파일 프로바이더입니다.
//!
//! TOML 동적 설정 파일을 폴링 주기마다 다시 읽고, 내용 해시가 바뀐
//! 경우에만 재발행합니다. 파싱 오류는 프로바이더 로그로만 남기고 이전
//! 발행을 유지합니다.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::Configuration;
use crate::settings::FileProviderSettings;

use super::{ConfigMessage, Provider};

pub const PROVIDER_NAME: &str = "file";

pub struct FileProvider {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileProvider {
    pub fn new(settings: &FileProviderSettings) -> Self {
        Self {
            path: PathBuf::from(&settings.path),
            poll_interval: Duration::from_secs(settings.poll_interval.max(1)),
        }
    }

    async fn load(&self) -> Option<(Configuration, u64)> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "동적 설정 파일 읽기 실패");
                return None;
            }
        };

        let configuration: Configuration = match toml::from_str(&content) {
            Ok(configuration) => configuration,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "동적 설정 파싱 실패");
                return None;
            }
        };

        Some((configuration, content_hash(&content)))
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn provide(
        self: Box<Self>,
        tx: mpsc::Sender<ConfigMessage>,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(path = %self.path.display(), "파일 프로바이더 시작");

        let mut last_hash: Option<u64> = None;

        loop {
            if let Some((configuration, hash)) = self.load().await {
                if last_hash != Some(hash) {
                    debug!(path = %self.path.display(), "설정 변경 감지, 발행");
                    let message = ConfigMessage {
                        provider_name: PROVIDER_NAME.to_string(),
                        configuration,
                    };
                    if tx.send(message).await.is_err() {
                        // 수신자가 사라졌으면 종료한다
                        break;
                    }
                    last_hash = Some(hash);
                }
            }

            tokio::select! {
                _ = stop.changed() => {
                    info!(path = %self.path.display(), "파일 프로바이더 종료");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings(path: &std::path::Path) -> FileProviderSettings {
        FileProviderSettings {
            path: path.to_string_lossy().to_string(),
            poll_interval: 1,
        }
    }

    #[tokio::test]
    async fn test_emits_initial_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [http.routers.api]
            rule = "Host(`api.example.com`)"
            service = "api-service"
        "#
        )
        .unwrap();

        let provider = Box::new(FileProvider::new(&settings(file.path())));
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(provider.provide(tx, stop_rx));

        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("발행 대기 타임아웃")
            .expect("메시지 수신 실패");

        assert_eq!(message.provider_name, "file");
        assert!(message.configuration.http.routers.contains_key("api"));

        let _ = stop_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_unchanged_content_not_reemitted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [http.routers.api]
            rule = "Host(`api.example.com`)"
            service = "api-service"
        "#
        )
        .unwrap();

        let provider = Box::new(FileProvider::new(&settings(file.path())));
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(provider.provide(tx, stop_rx));

        // 첫 발행은 수신된다
        assert!(tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .is_ok());

        // 내용이 그대로면 재발행되지 않는다
        let second = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(second.is_err(), "변경 없는 내용이 재발행됨");

        let _ = stop_tx.send(true);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_invalid_file_emits_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "this is not toml [[[").unwrap();

        let provider = Box::new(FileProvider::new(&settings(file.path())));
        let (tx, mut rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(provider.provide(tx, stop_rx));

        let received = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
        assert!(received.is_err(), "잘못된 파일은 발행되면 안 됨");

        let _ = stop_tx.send(true);
        let _ = handle.await;
    }
}

use tracing::{error, info};

use reverse_proxy_edge::logging;
use reverse_proxy_edge::server::ServerManager;
use reverse_proxy_edge::settings::Settings;

#[tokio::main]
async fn main() {
    let settings = match Settings::load().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("설정 로드 실패: {}", e);
            std::process::exit(1);
        }
    };

    logging::init_logging(&settings.logging);
    info!(entry_points = settings.entry_points.len(), "Reverse Proxy Edge 시작");

    let manager = ServerManager::new(settings);
    if let Err(e) = manager.start().await {
        error!(error = %e, "서버 실행 실패");
        std::process::exit(1);
    }
}

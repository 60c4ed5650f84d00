use tracing::{error, info, span, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::settings::{LogFormat, LogSettings};

/// 로깅 서브시스템을 초기화합니다.
pub fn init_logging(settings: &LogSettings) {
    let filter = EnvFilter::from_default_env()
        .add_directive(settings.level.into())
        .add_directive("reverse_proxy_edge=debug".parse().unwrap());

    match settings.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
    }
}

/// 요청 한 건의 액세스 로그 레코드입니다.
///
/// 매칭된 라우터 이름과 선택된 백엔드 주소를 함께 기록합니다.
#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub entry_point: String,
    pub method: String,
    pub path: String,
    pub host: String,
    /// 매칭된 라우터의 정규화된 이름
    pub router: Option<String>,
    pub backend: Option<String>,
    pub status_code: u16,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String, entry_point: &str) -> Self {
        Self {
            request_id,
            entry_point: entry_point.to_string(),
            method: String::new(),
            path: String::new(),
            host: String::new(),
            router: None,
            backend: None,
            status_code: 0,
            duration_ms: 0,
            error: None,
        }
    }

    pub fn with_request<B>(&mut self, req: &hyper::Request<B>) {
        self.method = req.method().to_string();
        self.path = req.uri().path().to_string();
        if let Some(host) = req.headers().get(hyper::header::HOST) {
            self.host = host.to_str().unwrap_or_default().to_string();
        }
    }

    pub fn with_router(&mut self, router: &str) {
        self.router = Some(router.to_string());
    }

    pub fn with_backend(&mut self, backend: &str) {
        self.backend = Some(backend.to_string());
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
    }
}

/// 완성된 레코드를 심각도에 맞는 레벨로 출력합니다.
pub fn log_request(log: &RequestLog) {
    let level = if log.error.is_some() {
        Level::ERROR
    } else if log.status_code >= 400 {
        Level::WARN
    } else {
        Level::INFO
    };

    let span = span!(
        Level::INFO,
        "request",
        request_id = %log.request_id,
        entry_point = %log.entry_point,
        method = %log.method,
        path = %log.path,
        host = %log.host,
        router = log.router.as_deref().unwrap_or(""),
        status = %log.status_code,
        duration_ms = %log.duration_ms
    );
    let _enter = span.enter();

    match level {
        Level::ERROR => error!(
            backend = ?log.backend,
            error = ?log.error,
            "요청 처리 실패"
        ),
        Level::WARN => warn!(
            backend = ?log.backend,
            "요청 처리 완료 (경고)"
        ),
        _ => info!(
            backend = ?log.backend,
            "요청 처리 완료"
        ),
    }
}

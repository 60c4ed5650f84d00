//! 서비스 매니저 모듈
//!
//! 서비스 정의로부터 업스트림 핸들러(로드밸런서, 미러링, 가중치 그룹)를
//! 빌드하고 헬스 체크 수명주기를 관리합니다. 빌드 패스가 곧 검증 패스이며,
//! 오류와 경고는 런타임 설정에 기록됩니다.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Response, Uri};
use tracing::warn;

mod balancer;
mod error;
mod health;
mod mirror;
mod weighted;

pub use balancer::{unavailable_response, LoadBalancer, ServerEntry};
pub use error::ServiceError;
pub use health::{HealthCheckSpec, HealthMonitor};
pub use mirror::{MirrorHandler, MirrorTarget};
pub use weighted::{WeightedHandler, WeightedTarget};

use crate::config::{
    LoadBalancerService, RuntimeConfiguration, Service as ServiceDef, Status,
};
use crate::logging::RequestLog;
use crate::middleware::Request;
use crate::proxy::ProxyClient;

/// 빌드된 서비스 핸들러입니다.
pub enum ServiceHandler {
    Balancer(LoadBalancer),
    Mirror(MirrorHandler),
    Weighted(WeightedHandler),
    /// 서버가 없는 서비스: 진단 메시지와 함께 503을 반환
    Unavailable { name: String },
}

impl ServiceHandler {
    /// 요청을 처리합니다.
    ///
    /// 미러링과 가중치 그룹이 하위 핸들러로 재귀하므로 박싱된 future를
    /// 반환합니다.
    pub fn handle<'a>(
        &'a self,
        req: Request,
        log: &'a mut RequestLog,
    ) -> Pin<Box<dyn Future<Output = Response<Full<Bytes>>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                ServiceHandler::Balancer(balancer) => balancer.handle(req, log).await,
                ServiceHandler::Mirror(mirror) => mirror.handle(req, log).await,
                ServiceHandler::Weighted(weighted) => weighted.handle(req, log).await,
                ServiceHandler::Unavailable { name } => unavailable_response(name),
            }
        })
    }
}

/// 빌드 결과: 이름별 핸들러와 수집된 헬스 체크 명세입니다.
///
/// 헬스 체크 태스크는 스냅샷 발행 시점에 시작되고 스냅샷이 소유합니다.
pub struct BuiltServices {
    pub handlers: HashMap<String, Arc<ServiceHandler>>,
    pub health_specs: Vec<HealthCheckSpec>,
}

/// 서비스 정의로부터 핸들러를 빌드하는 매니저입니다.
pub struct ServiceManager {
    services: HashMap<String, ServiceDef>,
    client: Arc<ProxyClient>,
}

impl ServiceManager {
    pub fn new(services: HashMap<String, ServiceDef>, client: Arc<ProxyClient>) -> Self {
        Self { services, client }
    }

    /// 모든 서비스를 빌드하고 상태를 런타임 설정에 기록합니다.
    ///
    /// 라우터가 참조하지 않는 서비스도 검증 대상입니다.
    pub fn build_all(&self, runtime: &mut RuntimeConfiguration) -> BuiltServices {
        let mut built: HashMap<String, Arc<ServiceHandler>> = HashMap::new();
        let mut specs: Vec<HealthCheckSpec> = Vec::new();

        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();

        for name in names {
            let mut path = Vec::new();
            let _ = self.build_service(&name, &mut path, runtime, &mut built, &mut specs);
        }

        BuiltServices {
            handlers: built,
            health_specs: specs,
        }
    }

    fn build_service(
        &self,
        name: &str,
        path: &mut Vec<String>,
        runtime: &mut RuntimeConfiguration,
        built: &mut HashMap<String, Arc<ServiceHandler>>,
        specs: &mut Vec<HealthCheckSpec>,
    ) -> Result<Arc<ServiceHandler>, ServiceError> {
        if let Some(handler) = built.get(name) {
            return Ok(handler.clone());
        }

        // 재귀 경로에 다시 나타나면 순환이다
        if let Some(idx) = path.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = path[idx..].to_vec();
            cycle.push(name.to_string());
            let diagnostic = format!("서비스 참조 순환: {}", cycle.join(" -> "));
            for member in &cycle {
                if let Some(info) = runtime.services.get_mut(member) {
                    if info.status != Status::Disabled {
                        info.add_err(diagnostic.clone());
                    }
                }
            }
            return Err(ServiceError::Cycle { path: cycle });
        }

        if let Some(info) = runtime.services.get(name) {
            if info.status == Status::Disabled {
                return Err(ServiceError::Disabled {
                    name: name.to_string(),
                });
            }
        }

        let def = self
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownService {
                name: name.to_string(),
            })?;

        match def.variant_count() {
            0 => {
                let reason = "서비스 본문(loadBalancer/mirroring/weighted) 누락".to_string();
                if let Some(info) = runtime.services.get_mut(name) {
                    info.add_err(reason.clone());
                }
                return Err(ServiceError::InvalidBody {
                    name: name.to_string(),
                    reason,
                });
            }
            1 => {}
            n => {
                let reason = format!("서비스 본문이 정확히 하나여야 함 ({}개 설정됨)", n);
                if let Some(info) = runtime.services.get_mut(name) {
                    info.add_err(reason.clone());
                }
                return Err(ServiceError::InvalidBody {
                    name: name.to_string(),
                    reason,
                });
            }
        }

        let handler = if let Some(lb) = &def.load_balancer {
            self.build_load_balancer(name, lb, runtime, specs)
        } else if let Some(mirroring) = &def.mirroring {
            path.push(name.to_string());
            let result = self.build_mirroring(name, mirroring, path, runtime, built, specs);
            path.pop();
            result?
        } else if let Some(weighted) = &def.weighted {
            path.push(name.to_string());
            let result = self.build_weighted(name, weighted, path, runtime, built, specs);
            path.pop();
            result?
        } else {
            // variant_count로 걸러졌으므로 도달하지 않는다
            Arc::new(ServiceHandler::Unavailable {
                name: name.to_string(),
            })
        };

        built.insert(name.to_string(), handler.clone());
        Ok(handler)
    }

    fn build_load_balancer(
        &self,
        name: &str,
        lb: &LoadBalancerService,
        runtime: &mut RuntimeConfiguration,
        specs: &mut Vec<HealthCheckSpec>,
    ) -> Arc<ServiceHandler> {
        let mut entries: Vec<Arc<ServerEntry>> = Vec::new();

        for server in &lb.servers {
            match parse_server_url(&server.url) {
                Ok(url) => entries.push(Arc::new(ServerEntry::new(url, server.weight))),
                Err(reason) => {
                    warn!(service = %name, url = %server.url, reason = %reason, "유효하지 않은 서버 URL, 건너뜀");
                    if let Some(info) = runtime.services.get_mut(name) {
                        info.add_warning(format!(
                            "유효하지 않은 서버 URL '{}' 건너뜀: {}",
                            server.url, reason
                        ));
                    }
                }
            }
        }

        if entries.is_empty() {
            if let Some(info) = runtime.services.get_mut(name) {
                info.add_warning("서버 목록이 비어 있음".to_string());
            }
            return Arc::new(ServiceHandler::Unavailable {
                name: name.to_string(),
            });
        }

        if let Some(health_check) = &lb.health_check {
            for entry in &entries {
                specs.push(HealthCheckSpec {
                    service: name.to_string(),
                    server: entry.clone(),
                    path: health_check.path.clone(),
                    interval: Duration::from_secs(health_check.interval.max(1)),
                    timeout: Duration::from_secs(health_check.timeout.max(1)),
                });
            }
        }

        Arc::new(ServiceHandler::Balancer(LoadBalancer::new(
            name.to_string(),
            entries,
            lb.method.clone(),
            lb.stickiness.clone(),
            lb.pass_host_header,
            self.client.clone(),
        )))
    }

    fn build_mirroring(
        &self,
        name: &str,
        mirroring: &crate::config::Mirroring,
        path: &mut Vec<String>,
        runtime: &mut RuntimeConfiguration,
        built: &mut HashMap<String, Arc<ServiceHandler>>,
        specs: &mut Vec<HealthCheckSpec>,
    ) -> Result<Arc<ServiceHandler>, ServiceError> {
        let primary = match self.build_service(&mirroring.service, path, runtime, built, specs) {
            Ok(handler) => handler,
            Err(e) => {
                if let Some(info) = runtime.services.get_mut(name) {
                    if info.status != Status::Disabled {
                        info.add_err(format!("primary 서비스 해석 실패: {}", e));
                    }
                }
                return Err(ServiceError::Disabled {
                    name: name.to_string(),
                });
            }
        };

        let mut targets = Vec::with_capacity(mirroring.mirrors.len());
        for mirror in &mirroring.mirrors {
            match self.build_service(&mirror.name, path, runtime, built, specs) {
                Ok(handler) => {
                    targets.push(MirrorTarget::new(mirror.name.clone(), handler, mirror.percent))
                }
                Err(e) => {
                    if let Some(info) = runtime.services.get_mut(name) {
                        if info.status != Status::Disabled {
                            info.add_err(format!("미러 서비스 '{}' 해석 실패: {}", mirror.name, e));
                        }
                    }
                    return Err(ServiceError::Disabled {
                        name: name.to_string(),
                    });
                }
            }
        }

        Ok(Arc::new(ServiceHandler::Mirror(MirrorHandler::new(
            name.to_string(),
            primary,
            targets,
        ))))
    }

    fn build_weighted(
        &self,
        name: &str,
        weighted: &crate::config::WeightedService,
        path: &mut Vec<String>,
        runtime: &mut RuntimeConfiguration,
        built: &mut HashMap<String, Arc<ServiceHandler>>,
        specs: &mut Vec<HealthCheckSpec>,
    ) -> Result<Arc<ServiceHandler>, ServiceError> {
        if weighted.services.is_empty() {
            if let Some(info) = runtime.services.get_mut(name) {
                info.add_warning("가중치 그룹에 하위 서비스가 없음".to_string());
            }
            return Ok(Arc::new(ServiceHandler::Unavailable {
                name: name.to_string(),
            }));
        }

        let mut targets = Vec::with_capacity(weighted.services.len());
        for item in &weighted.services {
            match self.build_service(&item.name, path, runtime, built, specs) {
                Ok(handler) => targets.push(WeightedTarget {
                    name: item.name.clone(),
                    handler,
                    weight: item.weight,
                }),
                Err(e) => {
                    if let Some(info) = runtime.services.get_mut(name) {
                        if info.status != Status::Disabled {
                            info.add_err(format!("하위 서비스 '{}' 해석 실패: {}", item.name, e));
                        }
                    }
                    return Err(ServiceError::Disabled {
                        name: name.to_string(),
                    });
                }
            }
        }

        Ok(Arc::new(ServiceHandler::Weighted(WeightedHandler::new(
            name.to_string(),
            targets,
        ))))
    }
}

/// 서버 URL을 파싱합니다. http/https 스킴과 authority가 필수입니다.
fn parse_server_url(url: &str) -> Result<Uri, String> {
    let uri: Uri = url.parse().map_err(|e: hyper::http::uri::InvalidUri| e.to_string())?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(other) => return Err(format!("지원하지 않는 스킴 '{}'", other)),
        None => return Err("스킴 없음 (http:// 또는 https:// 필요)".to_string()),
    }
    if uri.authority().is_none() {
        return Err("authority 없음".to_string());
    }

    Ok(uri)
}

/// 버퍼링된 본문에서 바이트를 꺼냅니다.
pub(crate) async fn collect_full(body: Full<Bytes>) -> Bytes {
    // Full<Bytes>의 에러 타입은 Infallible이므로 실패하지 않는다
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default()
}

/// 보관된 요청 부분과 본문으로 요청을 다시 만듭니다.
///
/// 재시도와 미러 사본 전송에 사용됩니다.
pub(crate) fn rebuild_request(parts: &hyper::http::request::Parts, body: &Bytes) -> Request {
    let mut req = hyper::Request::new(Full::new(body.clone()));
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn manager_for(toml_content: &str) -> (ServiceManager, RuntimeConfiguration) {
        let config: Configuration = toml::from_str(toml_content).unwrap();
        let runtime = RuntimeConfiguration::new(&config);
        let client = Arc::new(ProxyClient::new(Duration::from_secs(5)));
        (ServiceManager::new(config.http.services, client), runtime)
    }

    #[test]
    fn test_parse_server_url() {
        assert!(parse_server_url("http://127.0.0.1:8080").is_ok());
        assert!(parse_server_url("https://backend.internal").is_ok());
        assert!(parse_server_url("ftp://127.0.0.1").is_err());
        assert!(parse_server_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_missing_body_disables_service() {
        let (manager, mut runtime) = manager_for(
            r#"
            [http.services."broken@file"]
        "#,
        );

        let built = manager.build_all(&mut runtime);
        assert!(built.handlers.is_empty());
        assert_eq!(runtime.services["broken@file"].status, Status::Disabled);
    }

    #[tokio::test]
    async fn test_empty_servers_warns_and_serves_503() {
        let (manager, mut runtime) = manager_for(
            r#"
            [http.services."empty@file".loadBalancer]
            servers = []
        "#,
        );

        let built = manager.build_all(&mut runtime);
        assert_eq!(runtime.services["empty@file"].status, Status::Warning);

        let handler = &built.handlers["empty@file"];
        let req = hyper::Request::builder()
            .uri("http://foo.bar/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let mut log = RequestLog::new("test".to_string(), "web");
        let res = handler.handle(req, &mut log).await;
        assert_eq!(res.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_server_url_skipped_with_warning() {
        let (manager, mut runtime) = manager_for(
            r#"
            [[http.services."mixed@file".loadBalancer.servers]]
            url = "not a url"

            [[http.services."mixed@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#,
        );

        let built = manager.build_all(&mut runtime);

        let info = &runtime.services["mixed@file"];
        assert_eq!(info.status, Status::Warning);
        assert_eq!(info.errs.len(), 1);

        // 유효한 서버 하나로는 여전히 밸런서가 만들어진다
        match built.handlers["mixed@file"].as_ref() {
            ServiceHandler::Balancer(balancer) => assert_eq!(balancer.entries().len(), 1),
            _ => panic!("밸런서가 만들어져야 함"),
        }
    }

    #[tokio::test]
    async fn test_health_check_specs_collected_per_server() {
        let (manager, mut runtime) = manager_for(
            r#"
            [[http.services."checked@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8081"

            [[http.services."checked@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8082"

            [http.services."checked@file".loadBalancer.healthCheck]
            path = "/ping"
            interval = 1
            timeout = 1
        "#,
        );

        let built = manager.build_all(&mut runtime);
        assert_eq!(built.health_specs.len(), 2, "서버마다 헬스 체크 명세 하나");
        assert!(built.health_specs.iter().all(|s| s.path == "/ping"));
    }

    #[tokio::test]
    async fn test_weighted_resolves_sub_services() {
        let (manager, mut runtime) = manager_for(
            r#"
            [[http.services."group@file".weighted.services]]
            name = "a@file"
            weight = 3

            [[http.services."group@file".weighted.services]]
            name = "b@file"
            weight = 1

            [[http.services."a@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8081"

            [[http.services."b@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8082"
        "#,
        );

        let built = manager.build_all(&mut runtime);
        assert!(built.handlers.contains_key("group@file"));
        assert_eq!(runtime.error_count(), 0);
    }

    #[tokio::test]
    async fn test_weighted_with_unknown_sub_service_disabled() {
        let (manager, mut runtime) = manager_for(
            r#"
            [[http.services."group@file".weighted.services]]
            name = "missing@file"
            weight = 1
        "#,
        );

        manager.build_all(&mut runtime);
        assert_eq!(runtime.services["group@file"].status, Status::Disabled);
    }

    #[tokio::test]
    async fn test_mirror_cycle_detected() {
        let (manager, mut runtime) = manager_for(
            r#"
            [http.services."a@file".mirroring]
            service = "b@file"

            [http.services."b@file".mirroring]
            service = "a@file"
        "#,
        );

        manager.build_all(&mut runtime);

        for name in ["a@file", "b@file"] {
            assert_eq!(
                runtime.services[name].status,
                Status::Disabled,
                "{}이 비활성화되어야 함",
                name
            );
        }
    }
}

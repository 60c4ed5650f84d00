use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{RuntimeConfiguration, Status, TlsOptions};
use crate::middleware::{MiddlewareBuilder, MiddlewareChain};
use crate::rule::{effective_priority, CompiledRule, RequestMeta};
use crate::service::ServiceHandler;

/// 빌드가 끝난 라우트 하나입니다.
#[derive(Clone)]
pub struct RouteEntry {
    /// 정규화된 라우터 이름 (액세스 로그에 기록됨)
    pub name: String,
    pub rule: CompiledRule,
    pub priority: i64,
    pub chain: Arc<MiddlewareChain>,
    pub service: Arc<ServiceHandler>,
}

/// 엔트리포인트 하나의 HTTP 핸들러 트리입니다.
///
/// 라우트는 우선순위 내림차순으로 정렬되어 있고, 요청마다 첫 번째로
/// 매칭되는 라우트가 선택됩니다.
#[derive(Default)]
pub struct EntryPointHandler {
    routes: Vec<RouteEntry>,
}

impl EntryPointHandler {
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// 정렬 순서대로 첫 번째 매칭 라우트를 반환합니다.
    pub fn route(&self, meta: &RequestMeta<'_>) -> Option<&RouteEntry> {
        self.routes.iter().find(|entry| entry.rule.matches(meta))
    }
}

/// 엔트리포인트별 HTTP 핸들러 트리를 빌드합니다.
///
/// 빌드 패스가 곧 검증 패스입니다: 규칙 컴파일 실패, 미들웨어/서비스
/// 참조 실패는 해당 라우터만 비활성화하고 다른 라우터에는 영향을 주지
/// 않습니다.
pub fn build_entry_point_handlers(
    entry_points: &[String],
    runtime: &mut RuntimeConfiguration,
    service_handlers: &HashMap<String, Arc<ServiceHandler>>,
    middleware_builder: &MiddlewareBuilder,
    tls_options: &HashMap<String, TlsOptions>,
) -> HashMap<String, Arc<EntryPointHandler>> {
    let mut built_routes: Vec<(Vec<String>, RouteEntry)> = Vec::new();

    let mut router_names: Vec<String> = runtime.routers.keys().cloned().collect();
    router_names.sort();

    for name in router_names {
        let router = runtime.routers[&name].router.clone();

        // 1. 규칙 컴파일
        let rule = match CompiledRule::compile(&router.rule) {
            Ok(rule) => rule,
            Err(e) => {
                if let Some(info) = runtime.routers.get_mut(&name) {
                    info.add_err(format!("규칙 컴파일 실패: {}", e));
                }
                continue;
            }
        };

        // 2. 미들웨어 체인 해석
        let chain = if router.middlewares.is_empty() {
            MiddlewareChain::new()
        } else {
            match middleware_builder.build_chain(&router.middlewares, runtime) {
                Ok(chain) => chain,
                Err(e) => {
                    if let Some(info) = runtime.routers.get_mut(&name) {
                        info.add_err(format!("미들웨어 해석 실패: {}", e));
                    }
                    continue;
                }
            }
        };

        // 3. 서비스 해석
        let service_status = runtime.services.get(&router.service).map(|info| info.status);
        let service = match (service_handlers.get(&router.service), service_status) {
            (Some(handler), Some(status)) if status != Status::Disabled => handler.clone(),
            (_, None) => {
                if let Some(info) = runtime.routers.get_mut(&name) {
                    info.add_err(format!("알 수 없는 서비스: {}", router.service));
                }
                continue;
            }
            _ => {
                if let Some(info) = runtime.routers.get_mut(&name) {
                    info.add_err(format!("비활성화된 서비스: {}", router.service));
                }
                continue;
            }
        };

        // 4. TLSOption 참조 확인 (미해석이면 경고만 하고 기본 TLS 사용)
        if let Some(tls) = &router.tls {
            if let Some(options) = &tls.options {
                if !tls_options.contains_key(options) {
                    warn!(router = %name, options = %options, "TLSOption 미해석");
                    if let Some(info) = runtime.routers.get_mut(&name) {
                        info.add_warning(format!("TLSOption '{}'을 찾을 수 없음", options));
                    }
                }
            }
        }

        // 5. 선언되지 않은 엔트리포인트 참조는 무시하고 경고
        let targets: Vec<String> = if router.entry_points.is_empty() {
            entry_points.to_vec()
        } else {
            let (known, unknown): (Vec<String>, Vec<String>) = router
                .entry_points
                .iter()
                .cloned()
                .partition(|ep| entry_points.contains(ep));
            if !unknown.is_empty() {
                if let Some(info) = runtime.routers.get_mut(&name) {
                    info.add_warning(format!("선언되지 않은 엔트리포인트 무시: {:?}", unknown));
                }
            }
            known
        };

        if targets.is_empty() {
            debug!(router = %name, "연결할 엔트리포인트 없음");
            continue;
        }

        let priority = effective_priority(router.priority, &router.rule);
        built_routes.push((
            targets,
            RouteEntry {
                name: name.clone(),
                rule,
                priority,
                chain: Arc::new(chain),
                service,
            },
        ));
    }

    // 엔트리포인트별로 모아서 우선순위 정렬
    let mut handlers: HashMap<String, Vec<RouteEntry>> = entry_points
        .iter()
        .map(|ep| (ep.clone(), Vec::new()))
        .collect();

    for (targets, entry) in built_routes {
        for target in targets {
            if let Some(routes) = handlers.get_mut(&target) {
                routes.push(entry.clone());
            }
        }
    }

    handlers
        .into_iter()
        .map(|(entry_point, mut routes)| {
            sort_routes(&mut routes);
            (entry_point, Arc::new(EntryPointHandler { routes }))
        })
        .collect()
}

/// 우선순위 내림차순, 규칙 길이 내림차순, 이름 오름차순으로 정렬합니다.
fn sort_routes(routes: &mut [RouteEntry]) {
    routes.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.rule.rule().len().cmp(&a.rule.rule().len()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::proxy::ProxyClient;
    use crate::service::ServiceManager;
    use std::time::Duration;

    fn build_all(
        toml_content: &str,
        entry_points: &[&str],
    ) -> (HashMap<String, Arc<EntryPointHandler>>, RuntimeConfiguration) {
        let config: Configuration = toml::from_str(toml_content).unwrap();
        let mut runtime = RuntimeConfiguration::new(&config);

        let client = Arc::new(ProxyClient::new(Duration::from_secs(5)));
        let service_manager = ServiceManager::new(config.http.services.clone(), client);
        let built = service_manager.build_all(&mut runtime);

        let middleware_builder = MiddlewareBuilder::new(config.http.middlewares.clone());
        middleware_builder.validate_all(&mut runtime);

        let entry_points: Vec<String> = entry_points.iter().map(|s| s.to_string()).collect();
        let handlers = build_entry_point_handlers(
            &entry_points,
            &mut runtime,
            &built.handlers,
            &middleware_builder,
            &config.tls.options,
        );
        (handlers, runtime)
    }

    fn meta_for<'r>(req: &'r hyper::Request<()>) -> RequestMeta<'r> {
        RequestMeta::from_request(req, None)
    }

    const BASIC: &str = r#"
        [http.routers."foo@file"]
        entry_points = ["web"]
        rule = "Host(`foo.bar`)"
        service = "foo-service@file"

        [[http.services."foo-service@file".loadBalancer.servers]]
        url = "http://127.0.0.1:8080"
    "#;

    #[test]
    fn test_basic_router_enabled_and_routed() {
        let (handlers, runtime) = build_all(BASIC, &["web"]);

        assert_eq!(runtime.routers["foo@file"].status, Status::Enabled);

        let handler = &handlers["web"];
        let req = hyper::Request::builder()
            .uri("http://foo.bar/")
            .header("host", "foo.bar")
            .body(())
            .unwrap();
        let matched = handler.route(&meta_for(&req)).unwrap();
        assert_eq!(matched.name, "foo@file");
    }

    #[test]
    fn test_empty_entry_points_attaches_everywhere() {
        let toml_content = r#"
            [http.routers."foo@file"]
            rule = "Host(`foo.bar`)"
            service = "foo-service@file"

            [[http.services."foo-service@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, _) = build_all(toml_content, &["web", "websecure"]);
        assert_eq!(handlers["web"].routes().len(), 1);
        assert_eq!(handlers["websecure"].routes().len(), 1);
    }

    #[test]
    fn test_wrong_rule_disables_only_owner() {
        let toml_content = r#"
            [http.routers."broken@file"]
            entry_points = ["web"]
            rule = "WrongRule(`bar.foo`)"
            service = "foo-service@file"

            [http.routers."ok@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "foo-service@file"

            [[http.services."foo-service@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, runtime) = build_all(toml_content, &["web"]);

        assert_eq!(runtime.routers["broken@file"].status, Status::Disabled);
        assert_eq!(runtime.routers["ok@file"].status, Status::Enabled);
        assert_eq!(runtime.error_count(), 1);
        assert_eq!(handlers["web"].routes().len(), 1);
    }

    #[test]
    fn test_unknown_service_disables_router() {
        let toml_content = r#"
            [http.routers."foo@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "wrong-service@file"

            [[http.services."foo-service@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, runtime) = build_all(toml_content, &["web"]);

        assert_eq!(runtime.routers["foo@file"].status, Status::Disabled);
        // 참조되지 않은 서비스는 영향이 없다
        assert_eq!(runtime.services["foo-service@file"].status, Status::Enabled);
        assert!(handlers["web"].routes().is_empty());
    }

    #[test]
    fn test_unknown_middleware_disables_router() {
        let toml_content = r#"
            [http.routers."foo@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "foo-service@file"
            middlewares = ["missing@file"]

            [[http.services."foo-service@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (_, runtime) = build_all(toml_content, &["web"]);
        assert_eq!(runtime.routers["foo@file"].status, Status::Disabled);
    }

    #[test]
    fn test_priority_order() {
        let toml_content = r#"
            [http.routers."low@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "svc@file"
            priority = 10

            [http.routers."high@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "svc@file"
            priority = 20

            [[http.services."svc@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, _) = build_all(toml_content, &["web"]);

        let handler = &handlers["web"];
        let req = hyper::Request::builder()
            .uri("http://foo.bar/")
            .header("host", "foo.bar")
            .body(())
            .unwrap();
        let matched = handler.route(&meta_for(&req)).unwrap();
        assert_eq!(matched.name, "high@file", "우선순위가 높은 라우터가 이겨야 함");
    }

    #[test]
    fn test_priority_zero_uses_rule_length() {
        let toml_content = r#"
            [http.routers."short@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "svc@file"

            [http.routers."long@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`) && PathPrefix(`/api`)"
            service = "svc@file"

            [[http.services."svc@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, _) = build_all(toml_content, &["web"]);

        // 더 긴 규칙이 먼저 온다
        let routes = handlers["web"].routes();
        assert_eq!(routes[0].name, "long@file");
        assert_eq!(routes[1].name, "short@file");
    }

    #[test]
    fn test_priority_tie_breaks_by_name() {
        let toml_content = r#"
            [http.routers."beta@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "svc@file"
            priority = 5

            [http.routers."alpha@file"]
            entry_points = ["web"]
            rule = "Host(`bar.foo`)"
            service = "svc@file"
            priority = 5

            [[http.services."svc@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, _) = build_all(toml_content, &["web"]);

        let routes = handlers["web"].routes();
        // 우선순위와 규칙 길이가 같으면 이름 오름차순
        assert_eq!(routes[0].name, "alpha@file");
        assert_eq!(routes[1].name, "beta@file");
    }

    #[test]
    fn test_unresolved_tls_option_warns() {
        let toml_content = r#"
            [http.routers."foo@file"]
            entry_points = ["web"]
            rule = "Host(`foo.bar`)"
            service = "svc@file"
            [http.routers."foo@file".tls]
            options = "missing@file"

            [[http.services."svc@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"
        "#;

        let (handlers, runtime) = build_all(toml_content, &["web"]);

        assert_eq!(runtime.routers["foo@file"].status, Status::Warning);
        // 경고여도 라우트는 살아 있다
        assert_eq!(handlers["web"].routes().len(), 1);
    }
}

//! 검증 결과가 붙은 런타임 설정 스냅샷입니다.
//!
//! 요소별 상태(`Status`)와 오류 목록, 역참조(`used_by`)를 담습니다.
//! 빌드 패스(라우터/서비스/미들웨어 매니저)가 여기에 오류를 기록하고,
//! 외부 API/UI는 읽기 전용으로 조회합니다.

use std::collections::HashMap;

use serde::Serialize;

use super::{Configuration, Middleware, Router, Service, TcpRouter, TcpService};

/// 요소의 검증 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Enabled,
    Disabled,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterInfo {
    #[serde(flatten)]
    pub router: Router,
    pub status: Status,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    #[serde(flatten)]
    pub service: Service,
    pub status: Status,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errs: Vec<String>,
    #[serde(rename = "usedBy", skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiddlewareInfo {
    #[serde(flatten)]
    pub middleware: Middleware,
    pub status: Status,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errs: Vec<String>,
    #[serde(rename = "usedBy", skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpRouterInfo {
    #[serde(flatten)]
    pub router: TcpRouter,
    pub status: Status,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TcpServiceInfo {
    #[serde(flatten)]
    pub service: TcpService,
    pub status: Status,
    #[serde(rename = "error", skip_serializing_if = "Vec::is_empty")]
    pub errs: Vec<String>,
    #[serde(rename = "usedBy", skip_serializing_if = "Vec::is_empty")]
    pub used_by: Vec<String>,
}

macro_rules! impl_info {
    ($ty:ty) => {
        impl $ty {
            /// 오류를 기록하고 요소를 비활성화합니다.
            pub fn add_err(&mut self, err: impl Into<String>) {
                self.errs.push(err.into());
                self.status = Status::Disabled;
            }

            /// 경고를 기록합니다. 이미 비활성화된 요소는 그대로 둡니다.
            pub fn add_warning(&mut self, warning: impl Into<String>) {
                self.errs.push(warning.into());
                if self.status == Status::Enabled {
                    self.status = Status::Warning;
                }
            }
        }
    };
}

impl_info!(RouterInfo);
impl_info!(ServiceInfo);
impl_info!(MiddlewareInfo);
impl_info!(TcpRouterInfo);
impl_info!(TcpServiceInfo);

/// 병합된 설정에서 파생되는 검증 스냅샷입니다.
///
/// 발행 이후에는 불변이며, 교체는 새 스냅샷의 원자적 스왑으로만 일어납니다.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeConfiguration {
    pub routers: HashMap<String, RouterInfo>,
    pub services: HashMap<String, ServiceInfo>,
    pub middlewares: HashMap<String, MiddlewareInfo>,
    #[serde(rename = "tcpRouters")]
    pub tcp_routers: HashMap<String, TcpRouterInfo>,
    #[serde(rename = "tcpServices")]
    pub tcp_services: HashMap<String, TcpServiceInfo>,
}

impl RuntimeConfiguration {
    pub fn new(config: &Configuration) -> Self {
        let mut runtime = Self::default();

        for (name, router) in &config.http.routers {
            runtime.routers.insert(
                name.clone(),
                RouterInfo {
                    router: router.clone(),
                    status: Status::Enabled,
                    errs: Vec::new(),
                },
            );
        }

        for (name, service) in &config.http.services {
            runtime.services.insert(
                name.clone(),
                ServiceInfo {
                    service: service.clone(),
                    status: Status::Enabled,
                    errs: Vec::new(),
                    used_by: Vec::new(),
                },
            );
        }

        for (name, middleware) in &config.http.middlewares {
            runtime.middlewares.insert(
                name.clone(),
                MiddlewareInfo {
                    middleware: middleware.clone(),
                    status: Status::Enabled,
                    errs: Vec::new(),
                    used_by: Vec::new(),
                },
            );
        }

        for (name, router) in &config.tcp.routers {
            runtime.tcp_routers.insert(
                name.clone(),
                TcpRouterInfo {
                    router: router.clone(),
                    status: Status::Enabled,
                    errs: Vec::new(),
                },
            );
        }

        for (name, service) in &config.tcp.services {
            runtime.tcp_services.insert(
                name.clone(),
                TcpServiceInfo {
                    service: service.clone(),
                    status: Status::Enabled,
                    errs: Vec::new(),
                    used_by: Vec::new(),
                },
            );
        }

        runtime.populate_used_by();
        runtime
    }

    /// 역참조 목록을 채웁니다.
    ///
    /// 서비스는 자신을 참조하는 라우터와 상위 서비스, 미들웨어는 자신을
    /// 나열한 라우터와 체인 미들웨어를 역참조로 가집니다.
    fn populate_used_by(&mut self) {
        let mut service_refs: HashMap<String, Vec<String>> = HashMap::new();
        let mut middleware_refs: HashMap<String, Vec<String>> = HashMap::new();
        let mut tcp_service_refs: HashMap<String, Vec<String>> = HashMap::new();

        for (router_name, info) in &self.routers {
            service_refs
                .entry(info.router.service.clone())
                .or_default()
                .push(router_name.clone());
            for middleware in &info.router.middlewares {
                middleware_refs
                    .entry(middleware.clone())
                    .or_default()
                    .push(router_name.clone());
            }
        }

        for (parent_name, info) in &self.services {
            if let Some(mirroring) = &info.service.mirroring {
                service_refs
                    .entry(mirroring.service.clone())
                    .or_default()
                    .push(parent_name.clone());
                for mirror in &mirroring.mirrors {
                    service_refs
                        .entry(mirror.name.clone())
                        .or_default()
                        .push(parent_name.clone());
                }
            }
            if let Some(weighted) = &info.service.weighted {
                for item in &weighted.services {
                    service_refs
                        .entry(item.name.clone())
                        .or_default()
                        .push(parent_name.clone());
                }
            }
        }

        for (parent_name, info) in &self.middlewares {
            if let Some(chain) = &info.middleware.chain {
                for middleware in &chain.middlewares {
                    middleware_refs
                        .entry(middleware.clone())
                        .or_default()
                        .push(parent_name.clone());
                }
            }
        }

        for (router_name, info) in &self.tcp_routers {
            tcp_service_refs
                .entry(info.router.service.clone())
                .or_default()
                .push(router_name.clone());
        }

        for (name, mut refs) in service_refs {
            if let Some(info) = self.services.get_mut(&name) {
                refs.sort();
                info.used_by = refs;
            }
        }
        for (name, mut refs) in middleware_refs {
            if let Some(info) = self.middlewares.get_mut(&name) {
                refs.sort();
                info.used_by = refs;
            }
        }
        for (name, mut refs) in tcp_service_refs {
            if let Some(info) = self.tcp_services.get_mut(&name) {
                refs.sort();
                info.used_by = refs;
            }
        }
    }

    /// 오류가 기록된 요소 수 (테스트와 진단용)
    pub fn error_count(&self) -> usize {
        self.routers.values().filter(|i| !i.errs.is_empty()).count()
            + self.services.values().filter(|i| !i.errs.is_empty()).count()
            + self.middlewares.values().filter(|i| !i.errs.is_empty()).count()
            + self.tcp_routers.values().filter(|i| !i.errs.is_empty()).count()
            + self.tcp_services.values().filter(|i| !i.errs.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_configuration() -> Configuration {
        toml::from_str(
            r#"
            [http.routers."api@file"]
            rule = "Host(`api.example.com`)"
            service = "api-service@file"
            middlewares = ["auth@file"]

            [http.routers."admin@file"]
            rule = "Host(`admin.example.com`)"
            service = "api-service@file"

            [[http.services."api-service@file".loadBalancer.servers]]
            url = "http://127.0.0.1:8080"

            [http.middlewares."auth@file".basicAuth]
            users = ["toto:titi"]
        "#,
        )
        .unwrap()
    }

    #[test]
    fn test_new_marks_everything_enabled() {
        let runtime = RuntimeConfiguration::new(&sample_configuration());

        assert_eq!(runtime.routers.len(), 2);
        assert!(runtime
            .routers
            .values()
            .all(|info| info.status == Status::Enabled && info.errs.is_empty()));
        assert_eq!(runtime.error_count(), 0);
    }

    #[test]
    fn test_used_by_backreferences() {
        let runtime = RuntimeConfiguration::new(&sample_configuration());

        let service = &runtime.services["api-service@file"];
        assert_eq!(service.used_by, vec!["admin@file", "api@file"]);

        let middleware = &runtime.middlewares["auth@file"];
        assert_eq!(middleware.used_by, vec!["api@file"]);
    }

    #[test]
    fn test_add_err_disables() {
        let mut runtime = RuntimeConfiguration::new(&sample_configuration());

        let info = runtime.routers.get_mut("api@file").unwrap();
        info.add_err("규칙 컴파일 실패");

        assert_eq!(info.status, Status::Disabled);
        assert_eq!(info.errs.len(), 1);
        assert_eq!(runtime.error_count(), 1);
    }

    #[test]
    fn test_add_warning_keeps_disabled() {
        let mut runtime = RuntimeConfiguration::new(&sample_configuration());

        let info = runtime.services.get_mut("api-service@file").unwrap();
        info.add_warning("서버 목록이 비어 있음");
        assert_eq!(info.status, Status::Warning);

        info.add_err("본문 누락");
        info.add_warning("추가 경고");
        assert_eq!(info.status, Status::Disabled);
    }
}

//! 프로바이더가 제출하는 동적 설정 모델입니다.
//!
//! 모든 이름 필드는 `이름` 또는 `이름@프로바이더` 형태를 가지며,
//! 집계 이후에는 항상 후자로 정규화됩니다.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::middleware::add_prefix::AddPrefixConfig;
use crate::middleware::basic_auth::BasicAuthConfig;
use crate::middleware::headers::HeadersConfig;
use crate::middleware::rate_limit::RateLimitConfig;
use crate::middleware::redirect_scheme::RedirectSchemeConfig;
use crate::middleware::strip_prefix::StripPrefixConfig;

pub mod runtime;

pub use runtime::{RuntimeConfiguration, Status};

/// 이름과 프로바이더를 구분하는 문자
pub const PROVIDER_SEPARATOR: char = '@';

/// 이름을 `이름@프로바이더` 형태로 정규화합니다.
///
/// 이미 정규화된 이름은 그대로 반환하므로 멱등합니다.
pub fn qualify_name(name: &str, provider: &str) -> String {
    if name.contains(PROVIDER_SEPARATOR) {
        name.to_string()
    } else {
        format!("{}{}{}", name, PROVIDER_SEPARATOR, provider)
    }
}

/// UI 표시용 역변환: `이름@프로바이더`에서 이름 부분만 반환합니다.
pub fn local_name(qualified: &str) -> &str {
    qualified.split(PROVIDER_SEPARATOR).next().unwrap_or(qualified)
}

/// 프로바이더 한 곳이 제출하는 설정 스냅샷입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub http: HttpConfiguration,

    #[serde(default)]
    pub tcp: TcpConfiguration,

    #[serde(default)]
    pub tls: TlsConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfiguration {
    #[serde(default)]
    pub routers: HashMap<String, Router>,

    #[serde(default)]
    pub services: HashMap<String, Service>,

    #[serde(default)]
    pub middlewares: HashMap<String, Middleware>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpConfiguration {
    #[serde(default)]
    pub routers: HashMap<String, TcpRouter>,

    #[serde(default)]
    pub services: HashMap<String, TcpService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfiguration {
    #[serde(default)]
    pub certificates: Vec<TlsCertificate>,

    #[serde(default)]
    pub options: HashMap<String, TlsOptions>,
}

/// HTTP 라우터 정의입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    /// 비어 있으면 선언된 모든 엔트리포인트에 연결됩니다.
    #[serde(default, alias = "EntryPoints", alias = "entry_points")]
    pub entry_points: Vec<String>,

    #[serde(alias = "Rule")]
    pub rule: String,

    #[serde(alias = "Service")]
    pub service: String,

    #[serde(default, alias = "Middlewares")]
    pub middlewares: Vec<String>,

    /// 0이면 규칙 길이를 유효 우선순위로 사용합니다.
    #[serde(default, alias = "Priority")]
    pub priority: i32,

    #[serde(default, alias = "TLS", skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterTls {
    /// TLSOption 참조 (정규화 전에는 로컬 이름일 수 있음)
    #[serde(default)]
    pub options: Option<String>,
}

/// HTTP 서비스 정의. 정확히 하나의 본문만 설정되어야 합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, alias = "LoadBalancer", skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerService>,

    #[serde(default, alias = "Mirroring", skip_serializing_if = "Option::is_none")]
    pub mirroring: Option<Mirroring>,

    #[serde(default, alias = "Weighted", skip_serializing_if = "Option::is_none")]
    pub weighted: Option<WeightedService>,
}

impl Service {
    /// 설정된 본문 개수 (정상이면 1)
    pub fn variant_count(&self) -> usize {
        [
            self.load_balancer.is_some(),
            self.mirroring.is_some(),
            self.weighted.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerService {
    #[serde(default, alias = "Servers")]
    pub servers: Vec<Server>,

    #[serde(default, alias = "Method")]
    pub method: BalancerMethod,

    #[serde(default, alias = "HealthCheck", skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    #[serde(default = "default_pass_host_header", alias = "PassHostHeader")]
    pub pass_host_header: bool,

    #[serde(default, alias = "ResponseForwarding", skip_serializing_if = "Option::is_none")]
    pub response_forwarding: Option<ResponseForwarding>,

    #[serde(default, alias = "Stickiness", skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

impl Default for LoadBalancerService {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            method: BalancerMethod::default(),
            health_check: None,
            pass_host_header: default_pass_host_header(),
            response_forwarding: None,
            stickiness: None,
        }
    }
}

fn default_pass_host_header() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerMethod {
    /// 가중 라운드로빈
    Wrr,
    /// 동적 라운드로빈 (in-flight 최소 우선)
    Drr,
}

impl Default for BalancerMethod {
    fn default() -> Self {
        BalancerMethod::Wrr
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(alias = "URL", alias = "Url")]
    pub url: String,

    #[serde(default = "default_weight", alias = "Weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default = "default_health_path", alias = "Path")]
    pub path: String,

    /// 검사 주기 (초)
    #[serde(default = "default_health_interval", alias = "Interval")]
    pub interval: u64,

    /// 검사 타임아웃 (초)
    #[serde(default = "default_health_timeout", alias = "Timeout")]
    pub timeout: u64,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseForwarding {
    /// 응답 플러시 주기 (밀리초)
    #[serde(default = "default_flush_interval", alias = "FlushInterval")]
    pub flush_interval: u64,
}

fn default_flush_interval() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stickiness {
    #[serde(default = "default_sticky_cookie", alias = "CookieName")]
    pub cookie_name: String,
}

fn default_sticky_cookie() -> String {
    "rpe_sticky".to_string()
}

/// 미러링 서비스: 본 요청은 primary가 처리하고 사본은 미러로 전달합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mirroring {
    #[serde(alias = "Service")]
    pub service: String,

    #[serde(default, alias = "Mirrors")]
    pub mirrors: Vec<Mirror>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mirror {
    #[serde(alias = "Service", alias = "Name")]
    pub name: String,

    /// 샘플링 비율 (0-100)
    #[serde(default = "default_mirror_percent", alias = "Percent")]
    pub percent: u32,
}

fn default_mirror_percent() -> u32 {
    100
}

/// 가중치 그룹: 하위 서비스에 선언된 가중치대로 위임합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedService {
    #[serde(default, alias = "Services")]
    pub services: Vec<WeightedServiceItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedServiceItem {
    #[serde(alias = "Name")]
    pub name: String,

    #[serde(default = "default_weight", alias = "Weight")]
    pub weight: u32,
}

/// 미들웨어 정의. 지원 종류 중 정확히 하나만 설정되어야 합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Middleware {
    #[serde(default, alias = "BasicAuth", skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,

    #[serde(default, alias = "Headers", skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeadersConfig>,

    #[serde(default, alias = "Chain", skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainConfig>,

    #[serde(default, alias = "StripPrefix", skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<StripPrefixConfig>,

    #[serde(default, alias = "AddPrefix", skip_serializing_if = "Option::is_none")]
    pub add_prefix: Option<AddPrefixConfig>,

    #[serde(default, alias = "RedirectScheme", skip_serializing_if = "Option::is_none")]
    pub redirect_scheme: Option<RedirectSchemeConfig>,

    #[serde(default, alias = "RateLimit", skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Middleware {
    /// 설정된 종류 개수 (정상이면 1)
    pub fn kind_count(&self) -> usize {
        [
            self.basic_auth.is_some(),
            self.headers.is_some(),
            self.chain.is_some(),
            self.strip_prefix.is_some(),
            self.add_prefix.is_some(),
            self.redirect_scheme.is_some(),
            self.rate_limit.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    pub fn kind(&self) -> Option<&'static str> {
        if self.basic_auth.is_some() {
            Some("basicAuth")
        } else if self.headers.is_some() {
            Some("headers")
        } else if self.chain.is_some() {
            Some("chain")
        } else if self.strip_prefix.is_some() {
            Some("stripPrefix")
        } else if self.add_prefix.is_some() {
            Some("addPrefix")
        } else if self.redirect_scheme.is_some() {
            Some("redirectScheme")
        } else if self.rate_limit.is_some() {
            Some("rateLimit")
        } else {
            None
        }
    }
}

/// 체인 미들웨어: 하위 미들웨어 이름 목록을 순서대로 펼칩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(default, alias = "Middlewares")]
    pub middlewares: Vec<String>,
}

/// TCP 라우터 정의. 규칙은 `HostSNI` 매처만 사용할 수 있습니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouter {
    #[serde(default, alias = "EntryPoints", alias = "entry_points")]
    pub entry_points: Vec<String>,

    #[serde(alias = "Rule")]
    pub rule: String,

    #[serde(alias = "Service")]
    pub service: String,

    #[serde(default, alias = "Priority")]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpService {
    #[serde(default, alias = "LoadBalancer", skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<TcpLoadBalancer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpLoadBalancer {
    #[serde(default, alias = "Servers")]
    pub servers: Vec<TcpServer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpServer {
    #[serde(alias = "Address")]
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsCertificate {
    #[serde(alias = "CertFile")]
    pub cert_file: String,

    #[serde(alias = "KeyFile")]
    pub key_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// 최소 TLS 버전 ("1.2" | "1.3")
    #[serde(default, alias = "MinVersion", skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

impl Configuration {
    /// 라우팅에 기여하는 내용이 전혀 없으면 true
    pub fn is_empty(&self) -> bool {
        self.http.routers.is_empty()
            && self.http.services.is_empty()
            && self.http.middlewares.is_empty()
            && self.tcp.routers.is_empty()
            && self.tcp.services.is_empty()
            && self.tls.certificates.is_empty()
            && self.tls.options.is_empty()
    }

    /// 모든 이름과 참조를 프로바이더 네임스페이스로 정규화한 사본을 반환합니다.
    pub fn qualified(&self, provider: &str) -> Configuration {
        let mut out = Configuration::default();

        for (name, router) in &self.http.routers {
            let mut router = router.clone();
            router.service = qualify_name(&router.service, provider);
            router.middlewares = router
                .middlewares
                .iter()
                .map(|m| qualify_name(m, provider))
                .collect();
            if let Some(tls) = &mut router.tls {
                tls.options = tls.options.as_deref().map(|o| qualify_name(o, provider));
            }
            out.http.routers.insert(qualify_name(name, provider), router);
        }

        for (name, service) in &self.http.services {
            let mut service = service.clone();
            if let Some(mirroring) = &mut service.mirroring {
                mirroring.service = qualify_name(&mirroring.service, provider);
                for mirror in &mut mirroring.mirrors {
                    mirror.name = qualify_name(&mirror.name, provider);
                }
            }
            if let Some(weighted) = &mut service.weighted {
                for item in &mut weighted.services {
                    item.name = qualify_name(&item.name, provider);
                }
            }
            out.http.services.insert(qualify_name(name, provider), service);
        }

        for (name, middleware) in &self.http.middlewares {
            let mut middleware = middleware.clone();
            if let Some(chain) = &mut middleware.chain {
                chain.middlewares = chain
                    .middlewares
                    .iter()
                    .map(|m| qualify_name(m, provider))
                    .collect();
            }
            out.http.middlewares.insert(qualify_name(name, provider), middleware);
        }

        for (name, router) in &self.tcp.routers {
            let mut router = router.clone();
            router.service = qualify_name(&router.service, provider);
            out.tcp.routers.insert(qualify_name(name, provider), router);
        }

        for (name, service) in &self.tcp.services {
            out.tcp.services.insert(qualify_name(name, provider), service.clone());
        }

        out.tls.certificates = self.tls.certificates.clone();
        for (name, options) in &self.tls.options {
            out.tls.options.insert(qualify_name(name, provider), options.clone());
        }

        out
    }

    /// 프로바이더별 설정을 하나의 전역 설정으로 병합합니다.
    ///
    /// 이름이 먼저 정규화되므로 프로바이더 간 키 충돌은 발생하지 않습니다.
    pub fn merge(configurations: &HashMap<String, Configuration>) -> Configuration {
        let mut merged = Configuration::default();

        // 프로바이더 순서를 고정해 병합 결과를 결정적으로 만든다
        let mut providers: Vec<&String> = configurations.keys().collect();
        providers.sort();

        for provider in providers {
            let qualified = configurations[provider].qualified(provider);

            merged.http.routers.extend(qualified.http.routers);
            merged.http.services.extend(qualified.http.services);
            merged.http.middlewares.extend(qualified.http.middlewares);
            merged.tcp.routers.extend(qualified.tcp.routers);
            merged.tcp.services.extend(qualified.tcp.services);
            merged.tls.certificates.extend(qualified.tls.certificates);
            merged.tls.options.extend(qualified.tls.options);
        }

        merged
    }
}

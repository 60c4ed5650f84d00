//! Reverse Proxy Edge는 프로바이더 기반 동적 설정을 지원하는 HTTP/TCP 리버스 프록시입니다.
//!
//! # 주요 기능
//!
//! - 프로바이더별 동적 설정 수집 및 병합 (`@프로바이더` 네임스페이스)
//! - 규칙 기반 라우팅 (`Host`, `PathPrefix`, `Headers` 등)
//! - 로드밸런싱 (wrr/drr), 미러링, 가중치 그룹
//! - 미들웨어 체인 (basicAuth, headers, rateLimit, chain 등)
//! - 무중단 핫 스왑: 요청 경로는 원자적 로드 한 번으로 현재 핸들러를 읽음
//!
//! # 예제
//!
//! ```
//! use reverse_proxy_edge::config::Configuration;
//!
//! let toml = r#"
//!     [http.routers.api]
//!     rule = "Host(`api.example.com`)"
//!     service = "api-service"
//!
//!     [[http.services.api-service.loadBalancer.servers]]
//!     url = "http://127.0.0.1:8080"
//! "#;
//!
//! let config: Configuration = toml::from_str(toml).unwrap();
//! assert!(config.http.routers.contains_key("api"));
//! ```

pub mod config;
pub mod logging;
pub mod middleware;
pub mod provider;
pub mod proxy;
pub mod rule;
pub mod router;
pub mod server;
pub mod service;
pub mod settings;
pub mod tls;

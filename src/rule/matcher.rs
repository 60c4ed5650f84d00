use std::net::IpAddr;

use hyper::{HeaderMap, Method};
use regex_lite::Regex;

use super::error::RuleError;

/// 매칭에 필요한 요청 요약 정보입니다.
///
/// 라우터 후보를 순회하는 동안 추가 할당이 없도록 요청당 한 번만 추출합니다.
#[derive(Debug)]
pub struct RequestMeta<'r> {
    /// 포트를 제거하고 소문자로 정규화한 호스트
    pub host: String,
    pub path: &'r str,
    pub method: &'r Method,
    pub headers: &'r HeaderMap,
    pub query: Option<&'r str>,
    pub client_ip: Option<IpAddr>,
}

impl<'r> RequestMeta<'r> {
    pub fn from_request<B>(req: &'r hyper::Request<B>, client_ip: Option<IpAddr>) -> Self {
        let raw_host = req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().host());

        Self {
            host: normalize_host(raw_host.unwrap_or_default()),
            path: req.uri().path(),
            method: req.method(),
            headers: req.headers(),
            query: req.uri().query(),
            client_ip,
        }
    }
}

/// 호스트 문자열에서 포트를 제거하고 소문자로 바꿉니다.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    // IPv6 리터럴: "[::1]:80" -> "[::1]"
    let without_port = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rfind(':') {
            Some(idx) if host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => &host[..idx],
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// CIDR 표기 또는 단일 주소로 표현된 IP 대역입니다.
#[derive(Debug, Clone)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn parse(value: &str) -> Result<Self, String> {
        let (addr_str, prefix) = match value.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix.parse().map_err(|_| format!("프리픽스 파싱 실패: {}", prefix))?;
                (addr, Some(prefix))
            }
            None => (value, None),
        };

        let addr: IpAddr = addr_str.parse().map_err(|e| format!("주소 파싱 실패: {}", e))?;
        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max_prefix);
        if prefix > max_prefix {
            return Err(format!("프리픽스 {}가 최대값 {}을 초과", prefix, max_prefix));
        }

        Ok(Self { addr, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                (u32::from(*net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                (u128::from(*net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

/// 쿼리 파라미터 조건 (`key=value` 또는 `key`)
#[derive(Debug, Clone)]
pub struct QueryPair {
    pub key: String,
    pub value: Option<String>,
}

/// 컴파일된 매처 하나입니다. 규칙 AST의 리프 노드가 됩니다.
#[derive(Debug, Clone)]
pub enum Matcher {
    Host(Vec<String>),
    HostRegexp(Vec<Regex>),
    Path(Vec<String>),
    PathPrefix(Vec<String>),
    Method(Vec<String>),
    Headers { name: String, value: String },
    HeadersRegexp { name: String, pattern: Regex },
    Query(Vec<QueryPair>),
    ClientIp(Vec<IpNetwork>),
    /// TCP 전용: TLS ClientHello의 SNI와 비교
    HostSni(Vec<String>),
}

impl Matcher {
    /// 매처 이름과 인자로부터 매처를 생성합니다.
    ///
    /// 인자 개수와 패턴 유효성을 여기서 검증하므로, 실패는 규칙을 소유한
    /// 라우터에 국한됩니다.
    pub fn build(name: &str, args: &[String]) -> Result<Self, RuleError> {
        match name {
            "Host" => {
                require_args(name, args, 1)?;
                Ok(Matcher::Host(
                    args.iter().map(|a| normalize_host(a)).collect(),
                ))
            }
            "HostRegexp" => {
                require_args(name, args, 1)?;
                let mut patterns = Vec::with_capacity(args.len());
                for arg in args {
                    patterns.push(compile_anchored(arg)?);
                }
                Ok(Matcher::HostRegexp(patterns))
            }
            "Path" => {
                require_args(name, args, 1)?;
                Ok(Matcher::Path(args.to_vec()))
            }
            "PathPrefix" => {
                require_args(name, args, 1)?;
                Ok(Matcher::PathPrefix(args.to_vec()))
            }
            "Method" => {
                require_args(name, args, 1)?;
                Ok(Matcher::Method(
                    args.iter().map(|a| a.to_ascii_uppercase()).collect(),
                ))
            }
            "Headers" => {
                if args.len() != 2 {
                    return Err(RuleError::WrongArity {
                        matcher: name.to_string(),
                        expected: "2".to_string(),
                        got: args.len(),
                    });
                }
                Ok(Matcher::Headers {
                    name: args[0].to_ascii_lowercase(),
                    value: args[1].clone(),
                })
            }
            "HeadersRegexp" => {
                if args.len() != 2 {
                    return Err(RuleError::WrongArity {
                        matcher: name.to_string(),
                        expected: "2".to_string(),
                        got: args.len(),
                    });
                }
                Ok(Matcher::HeadersRegexp {
                    name: args[0].to_ascii_lowercase(),
                    pattern: compile_anchored(&args[1])?,
                })
            }
            "Query" => {
                require_args(name, args, 1)?;
                let pairs = args
                    .iter()
                    .map(|arg| match arg.split_once('=') {
                        Some((key, value)) => QueryPair {
                            key: key.to_string(),
                            value: Some(value.to_string()),
                        },
                        None => QueryPair {
                            key: arg.clone(),
                            value: None,
                        },
                    })
                    .collect();
                Ok(Matcher::Query(pairs))
            }
            "ClientIP" => {
                require_args(name, args, 1)?;
                let mut networks = Vec::with_capacity(args.len());
                for arg in args {
                    let network =
                        IpNetwork::parse(arg).map_err(|reason| RuleError::InvalidArgument {
                            matcher: name.to_string(),
                            value: arg.clone(),
                            reason,
                        })?;
                    networks.push(network);
                }
                Ok(Matcher::ClientIp(networks))
            }
            "HostSNI" => {
                require_args(name, args, 1)?;
                Ok(Matcher::HostSni(
                    args.iter().map(|a| normalize_host(a)).collect(),
                ))
            }
            unknown => Err(RuleError::UnknownMatcher {
                name: unknown.to_string(),
            }),
        }
    }

    pub fn is_host_sni(&self) -> bool {
        matches!(self, Matcher::HostSni(_))
    }

    /// HTTP 요청과 매칭합니다.
    pub fn matches(&self, meta: &RequestMeta<'_>) -> bool {
        match self {
            Matcher::Host(hosts) => hosts.iter().any(|h| h == &meta.host),
            Matcher::HostRegexp(patterns) => patterns.iter().any(|p| p.is_match(&meta.host)),
            Matcher::Path(paths) => paths.iter().any(|p| p == meta.path),
            Matcher::PathPrefix(prefixes) => prefixes.iter().any(|p| path_prefix_matches(p, meta.path)),
            Matcher::Method(methods) => methods.iter().any(|m| m == meta.method.as_str()),
            Matcher::Headers { name, value } => meta
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == value)
                .unwrap_or(false),
            Matcher::HeadersRegexp { name, pattern } => meta
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| pattern.is_match(v))
                .unwrap_or(false),
            Matcher::Query(pairs) => pairs.iter().all(|pair| query_matches(pair, meta.query)),
            Matcher::ClientIp(networks) => match meta.client_ip {
                Some(ip) => networks.iter().any(|n| n.contains(&ip)),
                None => false,
            },
            // HostSNI는 TCP 경로 전용이며 HTTP 요청에는 매칭되지 않는다
            Matcher::HostSni(_) => false,
        }
    }

    /// TLS ClientHello의 SNI와 매칭합니다. TCP 라우팅 경로에서만 사용됩니다.
    pub fn matches_sni(&self, sni: Option<&str>) -> bool {
        match self {
            Matcher::HostSni(hosts) => hosts.iter().any(|h| {
                h == "*" || sni.map(|s| normalize_host(s) == *h).unwrap_or(false)
            }),
            _ => false,
        }
    }
}

fn require_args(matcher: &str, args: &[String], min: usize) -> Result<(), RuleError> {
    if args.len() < min {
        return Err(RuleError::WrongArity {
            matcher: matcher.to_string(),
            expected: format!("{}+", min),
            got: args.len(),
        });
    }
    Ok(())
}

/// 정규식을 전체 일치로 고정해 컴파일합니다.
fn compile_anchored(pattern: &str) -> Result<Regex, RuleError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| RuleError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// 접두사 매칭은 세그먼트 경계를 지킵니다: `/api`는 `/api/users`에는
/// 매칭되지만 `/apis`에는 매칭되지 않습니다.
fn path_prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let prefix = prefix.trim_end_matches('/');
    let path_trimmed = path.trim_end_matches('/');
    path_trimmed == prefix || path.starts_with(&format!("{}/", prefix))
}

fn query_matches(pair: &QueryPair, query: Option<&str>) -> bool {
    let query = match query {
        Some(q) => q,
        None => return false,
    };

    query.split('&').any(|part| match part.split_once('=') {
        Some((key, value)) => {
            key == pair.key && pair.value.as_deref().map(|v| v == value).unwrap_or(true)
        }
        None => part == pair.key && pair.value.is_none(),
    })
}

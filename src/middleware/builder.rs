use std::collections::HashMap;

use tracing::debug;

use crate::config::{Middleware as MiddlewareDef, RuntimeConfiguration, Status};

use super::add_prefix::AddPrefixMiddleware;
use super::basic_auth::BasicAuthMiddleware;
use super::headers::HeadersMiddleware;
use super::rate_limit::RateLimitMiddleware;
use super::redirect_scheme::RedirectSchemeMiddleware;
use super::strip_prefix::StripPrefixMiddleware;
use super::{Middleware, MiddlewareChain, MiddlewareError};

/// 미들웨어 정의로부터 미들웨어 인스턴스를 생성합니다.
///
/// 파라미터 검증은 전부 생성 시점에 일어나므로, 잘못된 정의는 요청
/// 경로에 도달하기 전에 비활성화됩니다.
fn create_middleware(name: &str, def: &MiddlewareDef) -> Result<Box<dyn Middleware>, MiddlewareError> {
    debug!(middleware = %name, kind = ?def.kind(), "미들웨어 생성");

    if let Some(config) = &def.basic_auth {
        Ok(Box::new(BasicAuthMiddleware::new(config.clone())?))
    } else if let Some(config) = &def.headers {
        Ok(Box::new(HeadersMiddleware::new(config.clone())?))
    } else if let Some(config) = &def.strip_prefix {
        Ok(Box::new(StripPrefixMiddleware::new(config.clone())?))
    } else if let Some(config) = &def.add_prefix {
        Ok(Box::new(AddPrefixMiddleware::new(config.clone())?))
    } else if let Some(config) = &def.redirect_scheme {
        Ok(Box::new(RedirectSchemeMiddleware::new(config.clone())?))
    } else if let Some(config) = &def.rate_limit {
        Ok(Box::new(RateLimitMiddleware::new(config.clone())?))
    } else {
        Err(MiddlewareError::Config {
            middleware: name.to_string(),
            message: "지원하는 미들웨어 종류가 설정되지 않음".to_string(),
        })
    }
}

/// 이름으로 정의된 미들웨어를 빌드하고 라우터별 체인으로 구성합니다.
pub struct MiddlewareBuilder {
    middlewares: HashMap<String, MiddlewareDef>,
}

impl MiddlewareBuilder {
    pub fn new(middlewares: HashMap<String, MiddlewareDef>) -> Self {
        Self { middlewares }
    }

    /// 모든 미들웨어 정의를 선검증합니다.
    ///
    /// 파라미터 오류와 체인 순환을 찾아 런타임 설정에 기록합니다.
    /// 순환이 발견되면 순환에 속한 모든 미들웨어가 비활성화됩니다.
    pub fn validate_all(&self, runtime: &mut RuntimeConfiguration) {
        let mut names: Vec<String> = self.middlewares.keys().cloned().collect();
        names.sort();

        for name in names {
            let mut path = Vec::new();
            if let Err(e) = self.validate(&name, &mut path, runtime) {
                debug!(middleware = %name, error = %e, "미들웨어 검증 실패");
            }
        }
    }

    fn validate(
        &self,
        name: &str,
        path: &mut Vec<String>,
        runtime: &mut RuntimeConfiguration,
    ) -> Result<(), MiddlewareError> {
        // 재귀 경로에 다시 나타나면 순환이다
        if let Some(idx) = path.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = path[idx..].to_vec();
            cycle.push(name.to_string());
            let diagnostic = format!("미들웨어 체인 순환: {}", cycle.join(" -> "));

            for member in &cycle {
                if let Some(info) = runtime.middlewares.get_mut(member) {
                    if info.status != Status::Disabled {
                        info.add_err(diagnostic.clone());
                    }
                }
            }
            return Err(MiddlewareError::Config {
                middleware: name.to_string(),
                message: diagnostic,
            });
        }

        // 이미 비활성화로 판정된 미들웨어는 다시 검사하지 않는다
        if let Some(info) = runtime.middlewares.get(name) {
            if info.status == Status::Disabled {
                return Err(MiddlewareError::Config {
                    middleware: name.to_string(),
                    message: "비활성화된 미들웨어".to_string(),
                });
            }
        }

        let def = match self.middlewares.get(name) {
            Some(def) => def,
            None => {
                return Err(MiddlewareError::Config {
                    middleware: name.to_string(),
                    message: format!("알 수 없는 미들웨어: {}", name),
                })
            }
        };

        if def.kind_count() != 1 {
            let message = format!("미들웨어 종류가 정확히 하나여야 함 ({}개 설정됨)", def.kind_count());
            if let Some(info) = runtime.middlewares.get_mut(name) {
                info.add_err(message.clone());
            }
            return Err(MiddlewareError::Config {
                middleware: name.to_string(),
                message,
            });
        }

        if let Some(chain) = &def.chain {
            path.push(name.to_string());
            let result = chain.middlewares.iter().try_for_each(|sub| {
                if !self.middlewares.contains_key(sub) {
                    return Err(MiddlewareError::Config {
                        middleware: name.to_string(),
                        message: format!("체인이 알 수 없는 미들웨어 '{}'를 참조", sub),
                    });
                }
                self.validate(sub, path, runtime)
            });
            path.pop();

            if let Err(e) = result {
                if let Some(info) = runtime.middlewares.get_mut(name) {
                    if info.status != Status::Disabled {
                        info.add_err(e.to_string());
                    }
                }
                return Err(e);
            }
        } else if let Err(e) = create_middleware(name, def) {
            if let Some(info) = runtime.middlewares.get_mut(name) {
                info.add_err(e.to_string());
            }
            return Err(e);
        }

        Ok(())
    }

    /// 라우터의 미들웨어 이름 목록으로 체인을 구성합니다.
    ///
    /// 체인 종류는 하위 미들웨어를 선언 순서대로 펼칩니다. 참조가
    /// 해석되지 않거나 비활성화된 미들웨어가 있으면 에러를 반환하고,
    /// 호출자(라우터 매니저)가 라우터를 비활성화합니다.
    pub fn build_chain(
        &self,
        names: &[String],
        runtime: &RuntimeConfiguration,
    ) -> Result<MiddlewareChain, MiddlewareError> {
        let mut chain = MiddlewareChain::new();
        let mut path = Vec::new();
        for name in names {
            self.append(&mut chain, name, &mut path, runtime)?;
        }
        Ok(chain)
    }

    fn append(
        &self,
        chain: &mut MiddlewareChain,
        name: &str,
        path: &mut Vec<String>,
        runtime: &RuntimeConfiguration,
    ) -> Result<(), MiddlewareError> {
        if path.iter().any(|n| n == name) {
            return Err(MiddlewareError::Config {
                middleware: name.to_string(),
                message: "미들웨어 체인 순환".to_string(),
            });
        }

        let def = self.middlewares.get(name).ok_or_else(|| MiddlewareError::Config {
            middleware: name.to_string(),
            message: format!("알 수 없는 미들웨어: {}", name),
        })?;

        if let Some(info) = runtime.middlewares.get(name) {
            if info.status == Status::Disabled {
                return Err(MiddlewareError::Config {
                    middleware: name.to_string(),
                    message: format!("비활성화된 미들웨어: {}", name),
                });
            }
        }

        if let Some(chain_def) = &def.chain {
            path.push(name.to_string());
            for sub in &chain_def.middlewares {
                self.append(chain, sub, path, runtime)?;
            }
            path.pop();
        } else {
            chain.add_boxed(create_middleware(name, def)?);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    fn build(toml_content: &str) -> (MiddlewareBuilder, RuntimeConfiguration) {
        let config: Configuration = toml::from_str(toml_content).unwrap();
        let runtime = RuntimeConfiguration::new(&config);
        let builder = MiddlewareBuilder::new(config.http.middlewares);
        (builder, runtime)
    }

    #[test]
    fn test_chain_expands_in_order() {
        let (builder, mut runtime) = build(
            r#"
            [http.middlewares."chain@file".chain]
            middlewares = ["auth@file", "headers@file"]

            [http.middlewares."auth@file".basicAuth]
            users = ["toto:titi"]

            [http.middlewares."headers@file".headers.customRequestHeaders]
            X-Test = "1"
        "#,
        );

        builder.validate_all(&mut runtime);
        assert_eq!(runtime.error_count(), 0);

        let chain = builder
            .build_chain(&["chain@file".to_string()], &runtime)
            .unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_cycle_disables_all_members() {
        let (builder, mut runtime) = build(
            r#"
            [http.middlewares."a@file".chain]
            middlewares = ["b@file"]

            [http.middlewares."b@file".chain]
            middlewares = ["a@file"]
        "#,
        );

        builder.validate_all(&mut runtime);

        for name in ["a@file", "b@file"] {
            let info = &runtime.middlewares[name];
            assert_eq!(info.status, Status::Disabled, "{}이 비활성화되어야 함", name);
            assert!(
                info.errs.iter().any(|e| e.contains("순환")),
                "{}의 오류에 순환 진단이 있어야 함: {:?}",
                name,
                info.errs
            );
        }

        // 순환 체인은 빌드할 수 없다
        assert!(builder
            .build_chain(&["a@file".to_string()], &runtime)
            .is_err());
    }

    #[test]
    fn test_invalid_params_disable_middleware() {
        let (builder, mut runtime) = build(
            r#"
            [http.middlewares."limit@file".rateLimit]
            average = 0

            [http.middlewares."ok@file".headers.customRequestHeaders]
            X-Test = "1"
        "#,
        );

        builder.validate_all(&mut runtime);

        assert_eq!(runtime.middlewares["limit@file"].status, Status::Disabled);
        // 다른 미들웨어는 영향을 받지 않는다
        assert_eq!(runtime.middlewares["ok@file"].status, Status::Enabled);
    }

    #[test]
    fn test_unknown_middleware_reference() {
        let (builder, runtime) = build(
            r#"
            [http.middlewares."auth@file".basicAuth]
            users = ["toto:titi"]
        "#,
        );

        let result = builder.build_chain(&["missing@file".to_string()], &runtime);
        assert!(matches!(result, Err(MiddlewareError::Config { .. })));
    }

    #[test]
    fn test_chain_with_unknown_member_disabled() {
        let (builder, mut runtime) = build(
            r#"
            [http.middlewares."chain@file".chain]
            middlewares = ["missing@file"]
        "#,
        );

        builder.validate_all(&mut runtime);
        assert_eq!(runtime.middlewares["chain@file"].status, Status::Disabled);
    }
}

use std::collections::HashMap;

use crate::middleware::MiddlewareError;

use super::config::BasicAuthConfig;

/// 사용자 자격증명 검증기입니다.
///
/// 설정 파싱 시점에 항목 형식을 검증하므로, 잘못된 항목은 미들웨어를
/// 비활성화시키고 요청 경로에는 도달하지 않습니다.
pub struct UserVerifier {
    users: HashMap<String, String>,
}

impl UserVerifier {
    pub fn from_config(config: &BasicAuthConfig) -> Result<Self, MiddlewareError> {
        if config.users.is_empty() {
            return Err(MiddlewareError::Config {
                middleware: "basicAuth".to_string(),
                message: "사용자 목록이 비어 있음".to_string(),
            });
        }

        let mut users = HashMap::new();
        for entry in &config.users {
            let (username, hash) = entry.split_once(':').ok_or_else(|| MiddlewareError::Config {
                middleware: "basicAuth".to_string(),
                message: format!("잘못된 사용자 항목 '{}': '사용자:해시' 형태 필요", entry),
            })?;
            if username.is_empty() {
                return Err(MiddlewareError::Config {
                    middleware: "basicAuth".to_string(),
                    message: format!("잘못된 사용자 항목 '{}': 사용자 이름이 비어 있음", entry),
                });
            }
            users.insert(username.to_string(), hash.to_string());
        }

        Ok(Self { users })
    }

    /// 사용자 자격증명을 검증합니다.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|hash| verify_password(password, hash))
            .unwrap_or(false)
    }
}

/// 비밀번호 검증 함수. bcrypt 해시면 bcrypt로, 아니면 평문 비교.
fn verify_password(password: &str, hash: &str) -> bool {
    if hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$") {
        bcrypt::verify(password, hash).unwrap_or(false)
    } else {
        hash == password
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_password_verify() {
        let config = BasicAuthConfig {
            users: vec!["toto:titi".to_string()],
            realm: "Test".to_string(),
        };

        let verifier = UserVerifier::from_config(&config).unwrap();
        assert!(verifier.verify("toto", "titi"));
        assert!(!verifier.verify("toto", "wrong"));
        assert!(!verifier.verify("unknown", "titi"));
    }

    #[test]
    fn test_invalid_entry_rejected() {
        let config = BasicAuthConfig {
            users: vec!["foo".to_string()],
            realm: "Test".to_string(),
        };

        let result = UserVerifier::from_config(&config);
        assert!(matches!(result, Err(MiddlewareError::Config { .. })));
    }

    #[test]
    fn test_empty_users_rejected() {
        let config = BasicAuthConfig::default();
        assert!(UserVerifier::from_config(&config).is_err());
    }

    #[test]
    fn test_bcrypt_hash_verify() {
        // "password"의 bcrypt 해시
        let hash = bcrypt::hash("password", 4).unwrap();
        let config = BasicAuthConfig {
            users: vec![format!("admin:{}", hash)],
            realm: "Test".to_string(),
        };

        let verifier = UserVerifier::from_config(&config).unwrap();
        assert!(verifier.verify("admin", "password"));
        assert!(!verifier.verify("admin", "other"));
    }
}

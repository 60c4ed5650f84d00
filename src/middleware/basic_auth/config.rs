use serde::{Deserialize, Serialize};

/// Basic 인증 미들웨어 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
    /// `사용자:해시` 형태의 항목 목록.
    /// 해시는 bcrypt(`$2a$`/`$2b$`/`$2y$`) 또는 평문을 지원한다.
    #[serde(default, alias = "Users")]
    pub users: Vec<String>,

    #[serde(default = "default_realm", alias = "Realm")]
    pub realm: String,
}

fn default_realm() -> String {
    "Restricted".to_string()
}

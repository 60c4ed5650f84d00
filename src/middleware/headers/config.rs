use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 헤더 미들웨어 설정
///
/// 값이 빈 문자열이면 해당 헤더를 제거합니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersConfig {
    /// 업스트림으로 나가는 요청에 적용할 헤더
    #[serde(default, alias = "CustomRequestHeaders")]
    pub custom_request_headers: HashMap<String, String>,

    /// 클라이언트로 나가는 응답에 적용할 헤더
    #[serde(default, alias = "CustomResponseHeaders")]
    pub custom_response_headers: HashMap<String, String>,
}

impl HeadersConfig {
    pub fn is_empty(&self) -> bool {
        self.custom_request_headers.is_empty() && self.custom_response_headers.is_empty()
    }
}

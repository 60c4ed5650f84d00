use serde::{Deserialize, Serialize};

/// Rate Limit 미들웨어 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// 초당 허용 요청 수
    #[serde(default, alias = "Average")]
    pub average: u64,

    /// 순간 버스트 허용량. 0이면 average를 사용한다.
    #[serde(default, alias = "Burst")]
    pub burst: u64,
}

impl RateLimitConfig {
    pub fn effective_burst(&self) -> u64 {
        if self.burst == 0 {
            self.average
        } else {
            self.burst
        }
    }
}

//! 라우터 규칙을 불변 요청 술어로 컴파일하는 모듈입니다.

mod error;
pub mod matcher;
mod parser;

pub use error::RuleError;
pub use matcher::{Matcher, RequestMeta};
pub use parser::RuleNode;

/// 컴파일된 규칙입니다. 원본 문자열과 AST를 함께 보관합니다.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: String,
    node: RuleNode,
}

impl CompiledRule {
    /// HTTP 라우터 규칙을 컴파일합니다.
    pub fn compile(rule: &str) -> Result<Self, RuleError> {
        let node = parser::parse(rule)?;
        Ok(Self {
            rule: rule.to_string(),
            node,
        })
    }

    /// TCP 라우터 규칙을 컴파일합니다. `HostSNI` 매처만 허용됩니다.
    pub fn compile_tcp(rule: &str) -> Result<Self, RuleError> {
        let node = parser::parse(rule)?;

        let mut invalid = None;
        node.visit_matchers(&mut |matcher| {
            if !matcher.is_host_sni() && invalid.is_none() {
                invalid = Some(matcher_name(matcher));
            }
        });
        if let Some(name) = invalid {
            return Err(RuleError::InvalidTcpMatcher {
                name: name.to_string(),
            });
        }

        Ok(Self {
            rule: rule.to_string(),
            node,
        })
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// HTTP 요청과 매칭합니다.
    pub fn matches(&self, meta: &RequestMeta<'_>) -> bool {
        eval(&self.node, meta)
    }

    /// SNI 이름과 매칭합니다 (TCP 규칙 전용).
    pub fn matches_sni(&self, sni: Option<&str>) -> bool {
        eval_sni(&self.node, sni)
    }
}

fn eval(node: &RuleNode, meta: &RequestMeta<'_>) -> bool {
    match node {
        RuleNode::Matcher(matcher) => matcher.matches(meta),
        RuleNode::And(left, right) => eval(left, meta) && eval(right, meta),
        RuleNode::Or(left, right) => eval(left, meta) || eval(right, meta),
        RuleNode::Not(inner) => !eval(inner, meta),
    }
}

fn eval_sni(node: &RuleNode, sni: Option<&str>) -> bool {
    match node {
        RuleNode::Matcher(matcher) => matcher.matches_sni(sni),
        RuleNode::And(left, right) => eval_sni(left, sni) && eval_sni(right, sni),
        RuleNode::Or(left, right) => eval_sni(left, sni) || eval_sni(right, sni),
        RuleNode::Not(inner) => !eval_sni(inner, sni),
    }
}

fn matcher_name(matcher: &Matcher) -> &'static str {
    match matcher {
        Matcher::Host(_) => "Host",
        Matcher::HostRegexp(_) => "HostRegexp",
        Matcher::Path(_) => "Path",
        Matcher::PathPrefix(_) => "PathPrefix",
        Matcher::Method(_) => "Method",
        Matcher::Headers { .. } => "Headers",
        Matcher::HeadersRegexp { .. } => "HeadersRegexp",
        Matcher::Query(_) => "Query",
        Matcher::ClientIp(_) => "ClientIP",
        Matcher::HostSni(_) => "HostSNI",
    }
}

/// 우선순위가 0이면 규칙 길이를 유효 우선순위로 사용합니다.
pub fn effective_priority(priority: i32, rule: &str) -> i64 {
    if priority == 0 {
        rule.len() as i64
    } else {
        priority as i64
    }
}

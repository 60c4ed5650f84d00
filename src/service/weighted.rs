use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;

use crate::logging::RequestLog;
use crate::middleware::Request;

use super::balancer::unavailable_response;
use super::ServiceHandler;

pub struct WeightedTarget {
    pub name: String,
    pub handler: Arc<ServiceHandler>,
    pub weight: u32,
}

/// 가중치 그룹 핸들러: 선언된 가중치대로 하위 서비스에 위임합니다.
pub struct WeightedHandler {
    name: String,
    targets: Vec<WeightedTarget>,
    counter: AtomicUsize,
}

impl WeightedHandler {
    pub fn new(name: String, targets: Vec<WeightedTarget>) -> Self {
        Self {
            name,
            targets,
            counter: AtomicUsize::new(0),
        }
    }

    fn select(&self) -> Option<&WeightedTarget> {
        let total: usize = self.targets.iter().map(|t| t.weight.max(1) as usize).sum();
        if total == 0 {
            return None;
        }

        let mut slot = self.counter.fetch_add(1, Ordering::Relaxed) % total;
        for target in &self.targets {
            let weight = target.weight.max(1) as usize;
            if slot < weight {
                return Some(target);
            }
            slot -= weight;
        }
        None
    }

    pub async fn handle(&self, req: Request, log: &mut RequestLog) -> Response<Full<Bytes>> {
        match self.select() {
            Some(target) => target.handler.handle(req, log).await,
            None => unavailable_response(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, weight: u32) -> WeightedTarget {
        WeightedTarget {
            name: name.to_string(),
            handler: Arc::new(ServiceHandler::Unavailable {
                name: name.to_string(),
            }),
            weight,
        }
    }

    #[test]
    fn test_select_follows_weights() {
        let handler = WeightedHandler::new(
            "group@file".to_string(),
            vec![target("a@file", 3), target("b@file", 1)],
        );

        let mut counts = std::collections::HashMap::new();
        for _ in 0..8 {
            let selected = handler.select().unwrap();
            *counts.entry(selected.name.clone()).or_insert(0) += 1;
        }

        assert_eq!(counts["a@file"], 6);
        assert_eq!(counts["b@file"], 2);
    }

    #[test]
    fn test_empty_group_selects_nothing() {
        let handler = WeightedHandler::new("group@file".to_string(), Vec::new());
        assert!(handler.select().is_none());
    }
}

//! Race the same query against all downstreams.

use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Dispatches every query to all downstreams concurrently and returns the
/// first usable answer (neither an error nor SERVFAIL). The slower
/// attempts keep running and are discarded. When every downstream fails,
/// the last failure is returned.
pub struct Fastest {
    id: String,
    resolvers: Vec<SharedResolver>,
}

impl Fastest {
    pub fn new(id: impl Into<String>, resolvers: Vec<SharedResolver>) -> Self {
        assert!(!resolvers.is_empty(), "group requires at least one resolver");
        Fastest {
            id: id.into(),
            resolvers,
        }
    }
}

#[async_trait]
impl Resolver for Fastest {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let (tx, mut rx) = mpsc::channel(self.resolvers.len());
        for resolver in &self.resolvers {
            let resolver = Arc::clone(resolver);
            let query = query.clone();
            let client = client.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = resolver.resolve(&query, &client).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut last = None;
        while let Some(result) = rx.recv().await {
            match &result {
                Ok(Some(response)) if response.response_code() != ResponseCode::ServFail => {
                    return result;
                }
                Ok(None) => return result,
                _ => last = Some(result),
            }
        }
        last.expect("at least one downstream reported")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};
    use hickory_proto::rr::RecordType;
    use std::time::Duration;

    #[tokio::test]
    async fn quickest_usable_answer_wins() {
        let q = query("example.com.", RecordType::A);
        let slow = MockResolver::slow("slow", a_response(&q, [1, 1, 1, 1], 60), Duration::from_millis(300));
        let fast = MockResolver::answering("fast", a_response(&q, [2, 2, 2, 2], 60));
        let group = Fastest::new("fastest", vec![slow, fast]);
        let response = group.resolve(&q, &client()).await.unwrap().unwrap();
        let hickory_proto::rr::RData::A(addr) = response.answers()[0].data() else {
            panic!("expected an A record");
        };
        assert_eq!(addr.0.octets(), [2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn failures_wait_for_a_slower_success() {
        let q = query("example.com.", RecordType::A);
        let failing = MockResolver::failing("failing");
        let slow = MockResolver::slow("slow", a_response(&q, [3, 3, 3, 3], 60), Duration::from_millis(100));
        let group = Fastest::new("fastest", vec![failing, slow]);
        let response = group.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn all_failures_surface_the_last_one() {
        let q = query("example.com.", RecordType::A);
        let group = Fastest::new("fastest", vec![MockResolver::failing("a"), MockResolver::failing("b")]);
        assert!(group.resolve(&q, &client()).await.is_err());
    }
}

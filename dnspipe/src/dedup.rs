//! In-flight request coalescing.
//!
//! Identical queries arriving while one is already being resolved attach
//! to the in-flight call instead of hitting the upstream again. The first
//! arrival owns the call; followers wait on a shared channel and receive
//! a copy of the outcome with their own query id. Entries are removed as
//! the owner completes, and a drop guard removes them even when the
//! owner's future is cancelled mid-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, RecordType};
use tokio::sync::watch;

use crate::error::Result;
use crate::message;
use crate::modifier::ecs;
use crate::{ClientInfo, ResolveError, Resolver, SharedResolver};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    qname: String,
    qtype: RecordType,
    qclass: DNSClass,
    subnet: Option<(std::net::IpAddr, u8)>,
}

/// Outcome shared with followers. Errors are carried as text; each
/// follower rebuilds a transport error from it.
type Outcome = std::result::Result<Option<Message>, String>;
type Slot = watch::Receiver<Option<Arc<Outcome>>>;

pub struct Dedup {
    id: String,
    resolver: SharedResolver,
    /// Include the client subnet option in the coalescing key.
    ecs_aware: bool,
    inflight: Arc<Mutex<HashMap<Key, Slot>>>,
}

/// Removes the in-flight entry when the owning call completes or is
/// cancelled.
struct OwnerGuard {
    inflight: Arc<Mutex<HashMap<Key, Slot>>>,
    key: Key,
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .expect("dedup table poisoned")
            .remove(&self.key);
    }
}

impl Dedup {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, ecs_aware: bool) -> Self {
        Dedup {
            id: id.into(),
            resolver,
            ecs_aware,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key_for(&self, query: &Message) -> Option<Key> {
        let q = message::first_question(query)?;
        let subnet = if self.ecs_aware {
            ecs::subnet_from_message(query).map(|s| (s.address, s.source_prefix))
        } else {
            None
        };
        Some(Key {
            qname: q.name().to_lowercase().to_string(),
            qtype: q.query_type(),
            qclass: q.query_class(),
            subnet,
        })
    }
}

#[async_trait]
impl Resolver for Dedup {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(key) = self.key_for(query) else {
            return self.resolver.resolve(query, client).await;
        };

        enum Role {
            Owner(watch::Sender<Option<Arc<Outcome>>>, OwnerGuard),
            Follower(Slot),
        }

        let role = {
            let mut inflight = self.inflight.lock().expect("dedup table poisoned");
            match inflight.get(&key) {
                Some(slot) => Role::Follower(slot.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx);
                    Role::Owner(
                        tx,
                        OwnerGuard {
                            inflight: Arc::clone(&self.inflight),
                            key,
                        },
                    )
                }
            }
        };

        match role {
            Role::Owner(tx, guard) => {
                let result = self.resolver.resolve(query, client).await;
                // Unregister before publishing so late arrivals start a
                // fresh upstream call rather than reading a stale slot.
                drop(guard);
                let outcome = match &result {
                    Ok(response) => Ok(response.clone()),
                    Err(err) => Err(err.to_string()),
                };
                let _ = tx.send(Some(Arc::new(outcome)));
                result
            }
            Role::Follower(mut slot) => {
                loop {
                    if let Some(outcome) = slot.borrow().as_ref() {
                        return match outcome.as_ref() {
                            Ok(Some(response)) => {
                                let mut copy = response.clone();
                                copy.set_id(query.id());
                                Ok(Some(copy))
                            }
                            Ok(None) => Ok(None),
                            Err(text) => Err(ResolveError::transport(text.clone())),
                        };
                    }
                    if slot.changed().await.is_err() {
                        // Owner was cancelled before publishing.
                        return Err(ResolveError::transport("coalesced query was abandoned"));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_duplicates_make_one_upstream_call() {
        let q = query("popular.example.com.", RecordType::A);
        let upstream = MockResolver::slow(
            "up",
            a_response(&q, [1, 2, 3, 4], 60),
            Duration::from_millis(200),
        );
        let dedup = Arc::new(Dedup::new("dedup", upstream.clone(), false));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let dedup = Arc::clone(&dedup);
            let mut q = q.clone();
            q.set_id(rand::random());
            tasks.push(tokio::spawn(async move {
                let id = q.id();
                let response = dedup.resolve(&q, &client()).await.unwrap().unwrap();
                assert_eq!(response.id(), id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn distinct_questions_are_not_coalesced() {
        let upstream = MockResolver::echoing("up");
        let dedup = Dedup::new("dedup", upstream.clone(), false);
        dedup
            .resolve(&query("a.example.com.", RecordType::A), &client())
            .await
            .unwrap();
        dedup
            .resolve(&query("b.example.com.", RecordType::A), &client())
            .await
            .unwrap();
        assert_eq!(upstream.hits(), 2);
    }

    #[tokio::test]
    async fn sequential_queries_each_reach_upstream() {
        let upstream = MockResolver::echoing("up");
        let dedup = Dedup::new("dedup", upstream.clone(), false);
        let q = query("seq.example.com.", RecordType::A);
        dedup.resolve(&q, &client()).await.unwrap();
        dedup.resolve(&q, &client()).await.unwrap();
        assert_eq!(upstream.hits(), 2);
    }
}

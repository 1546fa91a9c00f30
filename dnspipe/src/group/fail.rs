//! Failover groups.
//!
//! Both groups keep the index of the currently-active downstream under a
//! mutex. A failing caller reports the index it observed; the rotation
//! only happens when that witness still matches the active index, so many
//! callers failing concurrently advance the rotation by one, not by many.
//! Fail-back additionally arms a reset timer on every failure and falls
//! back to the first downstream once the group has been quiet for
//! `reset_after`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::sync::{mpsc, Mutex};

use super::{available_gauge, response_is_failure, FailOptions};
use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, Resolver, SharedResolver};

/// Default quiet period before fail-back resets to the first downstream.
pub const DEFAULT_RESET_AFTER: Duration = Duration::from_secs(60);

struct FailoverCore {
    id: String,
    resolvers: Vec<SharedResolver>,
    opts: FailOptions,
    active: Mutex<usize>,
    failovers: Arc<Counter>,
}

impl FailoverCore {
    fn new(id: String, kind: &str, resolvers: Vec<SharedResolver>, opts: FailOptions) -> Self {
        assert!(!resolvers.is_empty(), "group requires at least one resolver");
        let failovers = Registry::global().counter(&format!("group.{}.{}.failover", kind, id));
        available_gauge(kind, &id, resolvers.len());
        FailoverCore {
            id,
            resolvers,
            opts,
            active: Mutex::new(0),
            failovers,
        }
    }

    async fn active(&self) -> usize {
        *self.active.lock().await
    }

    /// Advance the rotation, ignoring stale reports from callers that
    /// observed an index the group has already moved past.
    async fn rotate_from(&self, witness: usize) -> usize {
        let mut active = self.active.lock().await;
        if *active == witness {
            *active = (*active + 1) % self.resolvers.len();
            self.failovers.inc();
            log::warn!(
                "group {}: downstream {} failed, rotating to {}",
                self.id,
                self.resolvers[witness].id(),
                self.resolvers[*active].id()
            );
        }
        *active
    }

    /// Try up to N downstreams starting at the active index. `on_failure`
    /// fires once per failed attempt (used by fail-back to arm its timer).
    async fn resolve_rotating<F: Fn() + Send + Sync>(
        &self,
        query: &Message,
        client: &ClientInfo,
        on_failure: F,
    ) -> Result<Option<Message>> {
        let mut index = self.active().await;
        let mut last = None;
        for _ in 0..self.resolvers.len() {
            let result = self.resolvers[index].resolve(query, client).await;
            let failed = match &result {
                Err(_) => true,
                Ok(Some(response)) => response_is_failure(response, &self.opts),
                Ok(None) => false,
            };
            if !failed {
                return result;
            }
            on_failure();
            last = Some(result);
            index = self.rotate_from(index).await;
        }
        // Every downstream failed; surface the last error, or SERVFAIL for
        // failures that arrived as responses.
        match last.expect("at least one attempt was made") {
            Err(err) => Err(err),
            Ok(_) => Ok(Some(message::servfail(query))),
        }
    }
}

/// Rotates to the next downstream on failure and stays there. No
/// automatic fail-back.
pub struct FailRotate {
    core: FailoverCore,
}

impl FailRotate {
    pub fn new(id: impl Into<String>, resolvers: Vec<SharedResolver>, opts: FailOptions) -> Self {
        FailRotate {
            core: FailoverCore::new(id.into(), "fail-rotate", resolvers, opts),
        }
    }
}

#[async_trait]
impl Resolver for FailRotate {
    fn id(&self) -> &str {
        &self.core.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        self.core.resolve_rotating(query, client, || {}).await
    }
}

/// Like `FailRotate` but resets to the first downstream after a quiet
/// period. With `reset_after == 0` no state is kept at all and every
/// request tries the downstreams in configuration order.
pub struct FailBack {
    core: Arc<FailoverCore>,
    reset: Option<mpsc::UnboundedSender<()>>,
}

impl FailBack {
    pub fn new(
        id: impl Into<String>,
        resolvers: Vec<SharedResolver>,
        opts: FailOptions,
        reset_after: Duration,
    ) -> Self {
        let core = Arc::new(FailoverCore::new(id.into(), "fail-back", resolvers, opts));
        let reset = if reset_after.is_zero() {
            None
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(reset_timer(Arc::clone(&core), rx, reset_after));
            Some(tx)
        };
        FailBack { core, reset }
    }
}

/// Dedicated reset task. Every failure signal re-arms the timer; when it
/// expires with no further signals the rotation returns to index 0.
async fn reset_timer(core: Arc<FailoverCore>, mut signals: mpsc::UnboundedReceiver<()>, reset_after: Duration) {
    while signals.recv().await.is_some() {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(reset_after) => {
                    let mut active = core.active.lock().await;
                    if *active != 0 {
                        log::info!("group {}: quiet for {:?}, failing back to {}",
                            core.id, reset_after, core.resolvers[0].id());
                        *active = 0;
                    }
                    break;
                }
                again = signals.recv() => {
                    if again.is_none() {
                        return;
                    }
                    // Another failure arrived, start the wait over.
                }
            }
        }
    }
}

#[async_trait]
impl Resolver for FailBack {
    fn id(&self) -> &str {
        &self.core.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        match &self.reset {
            Some(reset) => {
                let reset = reset.clone();
                self.core
                    .resolve_rotating(query, client, move || {
                        let _ = reset.send(());
                    })
                    .await
            }
            None => {
                // Degenerate mode: always start from the first downstream.
                let mut active = self.core.active.lock().await;
                *active = 0;
                drop(active);
                self.core.resolve_rotating(query, client, || {}).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};
    use hickory_proto::rr::RecordType;

    #[tokio::test]
    async fn rotation_is_modulo_group_size() {
        let group = FailRotate::new(
            "rotate",
            vec![
                MockResolver::failing("r0"),
                MockResolver::failing("r1"),
                MockResolver::failing("r2"),
            ],
            FailOptions::default(),
        );
        for k in 1..=7usize {
            let witness = group.core.active().await;
            group.core.rotate_from(witness).await;
            assert_eq!(group.core.active().await, k % 3);
        }
    }

    #[tokio::test]
    async fn stale_witness_does_not_overshoot() {
        let group = FailRotate::new(
            "witness",
            vec![
                MockResolver::failing("r0"),
                MockResolver::failing("r1"),
                MockResolver::failing("r2"),
            ],
            FailOptions::default(),
        );
        // Two concurrent callers both observed index 0 failing; only the
        // first report rotates.
        assert_eq!(group.core.rotate_from(0).await, 1);
        assert_eq!(group.core.rotate_from(0).await, 1);
    }

    #[tokio::test]
    async fn failure_moves_to_next_resolver() {
        let q = query("example.com.", RecordType::A);
        let bad = MockResolver::failing("bad");
        let good = MockResolver::answering("good", a_response(&q, [9, 9, 9, 9], 60));
        let group = FailRotate::new("rotate", vec![bad.clone(), good.clone()], FailOptions::default());

        let response = group.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers()[0].ttl(), 60);
        assert_eq!(bad.hits(), 1);
        assert_eq!(good.hits(), 1);

        // The rotation sticks: the second request goes straight to `good`.
        group.resolve(&q, &client()).await.unwrap();
        assert_eq!(bad.hits(), 1);
        assert_eq!(good.hits(), 2);
    }

    #[tokio::test]
    async fn fail_back_resets_after_quiet_period() {
        let q = query("example.com.", RecordType::A);
        let flaky = MockResolver::failing("flaky");
        let steady = MockResolver::answering("steady", a_response(&q, [9, 9, 9, 9], 60));
        let group = FailBack::new(
            "back",
            vec![flaky.clone(), steady.clone()],
            FailOptions::default(),
            Duration::from_millis(200),
        );

        group.resolve(&q, &client()).await.unwrap();
        assert_eq!(group.core.active().await, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(group.core.active().await, 0);

        // Back on the first resolver again.
        let flaky_hits = flaky.hits();
        let _ = group.resolve(&q, &client()).await;
        assert_eq!(flaky.hits(), flaky_hits + 1);
    }

    #[tokio::test]
    async fn servfail_rotation_is_opt_in() {
        let q = query("example.com.", RecordType::A);
        let servfail = MockResolver::answering("sf", crate::message::servfail(&q));
        let good = MockResolver::answering("good", a_response(&q, [9, 9, 9, 9], 60));
        let lenient = FailRotate::new(
            "lenient",
            vec![servfail.clone(), good.clone()],
            FailOptions::default(),
        );
        let response = lenient.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(
            response.response_code(),
            hickory_proto::op::ResponseCode::ServFail
        );
        assert_eq!(good.hits(), 0);

        let strict = FailRotate::new(
            "strict",
            vec![servfail.clone(), good.clone()],
            FailOptions {
                servfail_error: true,
                empty_error: false,
            },
        );
        let response = strict.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers().len(), 1);
        assert_eq!(good.hits(), 1);
    }
}

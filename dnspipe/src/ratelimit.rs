//! Fixed-window rate limiting by client network.
//!
//! The source address is masked to a configurable prefix to form the
//! counting key, so one busy host cannot be dodged by rotating addresses
//! inside its network. Counters live in a map that is swapped wholesale at
//! every window boundary.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::error::Result;
use crate::metrics::{Counter, Registry};
use crate::modifier::ecs;
use crate::{ClientInfo, Resolver, SharedResolver};

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    /// Queries allowed per key and window.
    pub requests: u32,
    /// Window length.
    pub window: Duration,
    /// Prefix used to mask IPv4 sources into keys.
    pub prefix4: u8,
    /// Prefix used to mask IPv6 sources into keys.
    pub prefix6: u8,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        RateLimitOptions {
            requests: 100,
            window: Duration::from_secs(60),
            prefix4: 24,
            prefix6: 56,
        }
    }
}

struct Window {
    started: Instant,
    counts: HashMap<IpAddr, u32>,
}

pub struct RateLimiter {
    id: String,
    resolver: SharedResolver,
    /// Destination for queries over the limit; `None` drops them silently.
    limit_resolver: Option<SharedResolver>,
    opts: RateLimitOptions,
    window: Mutex<Window>,
    queries: Arc<Counter>,
    exceeded: Arc<Counter>,
    dropped: Arc<Counter>,
}

impl RateLimiter {
    pub fn new(
        id: impl Into<String>,
        resolver: SharedResolver,
        limit_resolver: Option<SharedResolver>,
        opts: RateLimitOptions,
    ) -> Self {
        let id = id.into();
        RateLimiter {
            queries: Registry::global().counter(&format!("ratelimit.{}.query", id)),
            exceeded: Registry::global().counter(&format!("ratelimit.{}.exceed", id)),
            dropped: Registry::global().counter(&format!("ratelimit.{}.drop", id)),
            id,
            resolver,
            limit_resolver,
            window: Mutex::new(Window {
                started: Instant::now(),
                counts: HashMap::new(),
            }),
            opts,
        }
    }

    /// Count this query against its network key. True when it is allowed
    /// through.
    fn admit(&self, source: IpAddr) -> bool {
        let prefix = match source {
            IpAddr::V4(_) => self.opts.prefix4,
            IpAddr::V6(_) => self.opts.prefix6,
        };
        let key = ecs::mask_address(source, prefix);
        let mut window = self.window.lock().expect("rate limiter poisoned");
        if window.started.elapsed() >= self.opts.window {
            window.started = Instant::now();
            window.counts = HashMap::new();
        }
        let count = window.counts.entry(key).or_insert(0);
        if *count >= self.opts.requests {
            return false;
        }
        *count += 1;
        true
    }
}

#[async_trait]
impl Resolver for RateLimiter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        self.queries.inc();
        if self.admit(client.source_addr.ip()) {
            return self.resolver.resolve(query, client).await;
        }
        self.exceeded.inc();
        match &self.limit_resolver {
            Some(limit) => limit.resolve(query, client).await,
            None => {
                self.dropped.inc();
                log::debug!(
                    "ratelimit {}: dropping query from {}",
                    self.id,
                    client.source_addr
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{client, query, MockResolver};
    use crate::{ClientInfo, Transport};
    use hickory_proto::rr::RecordType;

    fn limiter(requests: u32, upstream: SharedResolver) -> RateLimiter {
        RateLimiter::new(
            "rl",
            upstream,
            None,
            RateLimitOptions {
                requests,
                window: Duration::from_secs(60),
                prefix4: 24,
                prefix6: 56,
            },
        )
    }

    #[tokio::test]
    async fn forwards_at_most_the_window_allowance() {
        let upstream = MockResolver::echoing("up");
        let rl = limiter(3, upstream.clone());
        let q = query("example.com.", RecordType::A);
        let mut answered = 0;
        for _ in 0..10 {
            if rl.resolve(&q, &client()).await.unwrap().is_some() {
                answered += 1;
            }
        }
        assert_eq!(answered, 3);
        assert_eq!(upstream.hits(), 3);
    }

    #[tokio::test]
    async fn neighbouring_hosts_share_a_network_key() {
        let upstream = MockResolver::echoing("up");
        let rl = limiter(1, upstream.clone());
        let q = query("example.com.", RecordType::A);

        let a = ClientInfo::new("192.168.1.10:1000".parse().unwrap(), "l", Transport::Udp);
        let b = ClientInfo::new("192.168.1.20:1000".parse().unwrap(), "l", Transport::Udp);
        let other = ClientInfo::new("192.168.2.10:1000".parse().unwrap(), "l", Transport::Udp);

        assert!(rl.resolve(&q, &a).await.unwrap().is_some());
        assert!(rl.resolve(&q, &b).await.unwrap().is_none());
        assert!(rl.resolve(&q, &other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn window_rollover_resets_counters() {
        let upstream = MockResolver::echoing("up");
        let rl = RateLimiter::new(
            "rl",
            upstream.clone(),
            None,
            RateLimitOptions {
                requests: 1,
                window: Duration::from_millis(50),
                prefix4: 24,
                prefix6: 56,
            },
        );
        let q = query("example.com.", RecordType::A);
        assert!(rl.resolve(&q, &client()).await.unwrap().is_some());
        assert!(rl.resolve(&q, &client()).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rl.resolve(&q, &client()).await.unwrap().is_some());
    }
}

//! Fan-out and failover over multiple downstream resolvers.
//!
//! All groups take N downstreams and present a single element id. The
//! failure test shared by the failover groups treats any resolver error as
//! a failed attempt; SERVFAIL responses and CNAME-only answers can be
//! opted in as failures per group.

mod fail;
mod fastest;
mod replace;

pub use fail::{FailBack, FailRotate};
pub use fastest::Fastest;
pub use replace::{Replace, ReplacePattern};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::opt::EdnsCode;
use hickory_proto::rr::RecordType;

use crate::error::Result;
use crate::metrics::Registry;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Extended DNS Error info-codes indicating an intentional block; a
/// CNAME-only answer carrying one of these is not a failover signal.
const EDE_BLOCKED: u16 = 15;
const EDE_CENSORED: u16 = 16;
const EDE_FILTERED: u16 = 17;

/// Per-group failure knobs shared by fail-rotate and fail-back.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailOptions {
    /// Count SERVFAIL responses as failures.
    pub servfail_error: bool,
    /// Count answers consisting only of CNAME records as failures, unless
    /// an EDE option marks the response as intentionally blocked.
    pub empty_error: bool,
}

/// Shared failure test for responses that did arrive.
fn response_is_failure(response: &Message, opts: &FailOptions) -> bool {
    if opts.servfail_error && response.response_code() == ResponseCode::ServFail {
        return true;
    }
    if opts.empty_error {
        let answers = response.answers();
        let cname_only = !answers.is_empty() && answers.iter().all(|r| r.record_type() == RecordType::CNAME);
        if cname_only && !intentionally_blocked(response) {
            return true;
        }
    }
    false
}

fn intentionally_blocked(response: &Message) -> bool {
    let Some(bytes) = crate::modifier::get_option(response, EdnsCode::from(15u16)) else {
        return false;
    };
    if bytes.len() < 2 {
        return false;
    }
    let info_code = u16::from_be_bytes([bytes[0], bytes[1]]);
    matches!(info_code, EDE_BLOCKED | EDE_CENSORED | EDE_FILTERED)
}

/// Dispatches each query to the next downstream in turn. No failover.
pub struct RoundRobin {
    id: String,
    resolvers: Vec<SharedResolver>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(id: impl Into<String>, resolvers: Vec<SharedResolver>) -> Self {
        assert!(!resolvers.is_empty(), "group requires at least one resolver");
        RoundRobin {
            id: id.into(),
            resolvers,
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Resolver for RoundRobin {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.resolvers.len();
        self.resolvers[index].resolve(query, client).await
    }
}

/// Count of usable downstreams published by the failover groups.
fn available_gauge(kind: &str, id: &str, total: usize) -> Arc<crate::metrics::Gauge> {
    let gauge = Registry::global().gauge(&format!("group.{}.{}.available", kind, id));
    gauge.set(total as i64);
    gauge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};

    #[tokio::test]
    async fn round_robin_distributes_evenly() {
        let q = query("example.com.", RecordType::A);
        let r1 = MockResolver::answering("r1", a_response(&q, [1, 1, 1, 1], 60));
        let r2 = MockResolver::answering("r2", a_response(&q, [2, 2, 2, 2], 60));
        let group = RoundRobin::new("rr", vec![r1.clone(), r2.clone()]);
        for _ in 0..10 {
            group.resolve(&q, &client()).await.unwrap();
        }
        assert_eq!(r1.hits(), 5);
        assert_eq!(r2.hits(), 5);
    }

    #[test]
    fn cname_only_answers_can_count_as_failures() {
        use hickory_proto::rr::rdata::CNAME;
        use hickory_proto::rr::{Name, RData, Record};
        use std::str::FromStr;

        let q = query("example.com.", RecordType::A);
        let mut response = crate::message::synthesize(&q, ResponseCode::NoError);
        response.add_answer(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            60,
            RData::CNAME(CNAME(Name::from_str("alias.example.net.").unwrap())),
        ));
        let opts = FailOptions {
            servfail_error: false,
            empty_error: true,
        };
        assert!(response_is_failure(&response, &opts));

        // An EDE "blocked" marker exempts the response.
        let mut ede = vec![0u8, EDE_BLOCKED as u8];
        ede.extend_from_slice(b"blocked");
        crate::modifier::set_option(&mut response, 15, ede);
        assert!(!response_is_failure(&response, &opts));
    }
}

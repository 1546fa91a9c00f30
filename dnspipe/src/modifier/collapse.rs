//! Response collapsing: answers only, owner rewritten to the query name.
//!
//! Strips CNAME chains (and any other answer whose type differs from the
//! question's) so clients only see records of the type they asked for,
//! owned by the name they asked about.

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::Record;

use crate::error::Result;
use crate::message;
use crate::{ClientInfo, Resolver, SharedResolver};

pub struct Collapse {
    id: String,
    resolver: SharedResolver,
    /// Return NXDOMAIN instead of an empty NOERROR answer when collapsing
    /// removed everything.
    pub nxdomain_on_empty: bool,
}

impl Collapse {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, nxdomain_on_empty: bool) -> Self {
        Collapse {
            id: id.into(),
            resolver,
            nxdomain_on_empty,
        }
    }
}

#[async_trait]
impl Resolver for Collapse {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(mut response) = self.resolver.resolve(query, client).await? else {
            return Ok(None);
        };
        let Some(q) = message::first_question(query) else {
            return Ok(Some(response));
        };
        let qtype = q.query_type();
        let qname = q.name().clone();

        let survivors: Vec<Record> = response
            .take_answers()
            .into_iter()
            .filter(|r| r.record_type() == qtype)
            .map(|mut r| {
                r.set_name(qname.clone());
                r
            })
            .collect();
        if survivors.is_empty() && self.nxdomain_on_empty {
            return Ok(Some(message::nxdomain(query)));
        }
        response.insert_answers(survivors);
        Ok(Some(response))
    }
}

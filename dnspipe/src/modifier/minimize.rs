//! Response minimization: answers only.

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::{Record, RecordType};

use crate::error::Result;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Clears the authority and additional sections of the response. The EDNS0
/// OPT pseudo-record survives.
pub struct Minimize {
    id: String,
    resolver: SharedResolver,
}

impl Minimize {
    pub fn new(id: impl Into<String>, resolver: SharedResolver) -> Self {
        Minimize {
            id: id.into(),
            resolver,
        }
    }
}

#[async_trait]
impl Resolver for Minimize {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        match self.resolver.resolve(query, client).await? {
            Some(mut response) => {
                response.take_name_servers();
                let opt_only: Vec<Record> = response
                    .take_additionals()
                    .into_iter()
                    .filter(|r| r.record_type() == RecordType::OPT)
                    .collect();
                response.insert_additionals(opt_only);
                Ok(Some(response))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};
    use hickory_proto::rr::rdata::NS;
    use hickory_proto::rr::{Name, RData};
    use std::str::FromStr;

    #[tokio::test]
    async fn authority_and_extra_are_cleared() {
        let q = query("example.com.", RecordType::A);
        let mut reply = a_response(&q, [1, 2, 3, 4], 300);
        reply.add_name_server(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::NS(NS(Name::from_str("ns1.example.com.").unwrap())),
        ));
        let upstream = MockResolver::answering("up", reply);
        let minimize = Minimize::new("min", upstream);
        let response = minimize.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers().len(), 1);
        assert!(response.name_servers().is_empty());
        assert!(response.additionals().is_empty());
    }
}

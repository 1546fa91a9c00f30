//! Response TTL clamping.

use async_trait::async_trait;
use hickory_proto::op::Message;

use crate::error::Result;
use crate::message;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Clamps every record TTL of the response into `[ttl_min, ttl_max]`.
pub struct TtlModifier {
    id: String,
    resolver: SharedResolver,
    ttl_min: u32,
    ttl_max: u32,
}

impl TtlModifier {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, ttl_min: u32, ttl_max: u32) -> Self {
        TtlModifier {
            id: id.into(),
            resolver,
            ttl_min,
            ttl_max: ttl_max.max(ttl_min),
        }
    }
}

#[async_trait]
impl Resolver for TtlModifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        match self.resolver.resolve(query, client).await? {
            Some(mut response) => {
                message::clamp_ttls(&mut response, self.ttl_min, self.ttl_max);
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
    use hickory_proto::rr::RecordType;

    #[tokio::test]
    async fn ttls_are_clamped_into_bounds() {
        let q = query("example.com.", RecordType::A);
        let upstream = MockResolver::answering("up", a_response(&q, [1, 2, 3, 4], 7));
        let modifier = TtlModifier::new("ttl", upstream, 60, 3600);
        let response = modifier.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers()[0].ttl(), 60);
    }
}

//! EDNS0 padding (RFC 7830 / RFC 8467).
//!
//! Placed in front of encrypted upstreams to pad outgoing queries to a
//! multiple of 128 bytes and returned responses to a multiple of 468
//! bytes, never past the requester's advertised UDP size. In strip mode it
//! removes padding in both directions, for relaying toward unencrypted
//! transports.

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;

use crate::error::Result;
use crate::message;
use crate::{ClientInfo, Resolver, SharedResolver};

/// Recommended block sizes from RFC 8467 §4.1.
pub const QUERY_BLOCK: usize = 128;
pub const RESPONSE_BLOCK: usize = 468;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// Pad queries and responses to their block sizes.
    Pad,
    /// Remove padding options in both directions.
    Strip,
}

pub struct Padder {
    id: String,
    resolver: SharedResolver,
    mode: PadMode,
}

impl Padder {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, mode: PadMode) -> Self {
        Padder {
            id: id.into(),
            resolver,
            mode,
        }
    }
}

/// Pad `msg` so its wire form is a multiple of `block`, not exceeding
/// `cap`. Replaces any existing padding option.
fn pad_to_block(msg: &mut Message, block: usize, cap: usize) -> Result<()> {
    msg.extensions_mut()
        .get_or_insert_with(hickory_proto::op::Edns::new);
    super::remove_option(msg, EdnsCode::Padding);
    // The empty padding option itself costs 4 bytes of option header.
    let base = msg.to_vec()?.len() + 4;
    if base > cap {
        return Ok(());
    }
    let target = (base.div_ceil(block) * block).min(cap);
    super::set_option(msg, u16::from(EdnsCode::Padding), vec![0u8; target - base]);
    Ok(())
}

#[async_trait]
impl Resolver for Padder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let mut outgoing = query.clone();
        match self.mode {
            PadMode::Pad => pad_to_block(&mut outgoing, QUERY_BLOCK, usize::MAX)?,
            PadMode::Strip => super::remove_option(&mut outgoing, EdnsCode::Padding),
        }
        let Some(mut response) = self.resolver.resolve(&outgoing, client).await? else {
            return Ok(None);
        };
        match self.mode {
            PadMode::Pad => {
                let cap = message::max_udp_size(query);
                pad_to_block(&mut response, RESPONSE_BLOCK, cap)?;
            }
            PadMode::Strip => super::remove_option(&mut response, EdnsCode::Padding),
        }
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::query;
    use hickory_proto::rr::RecordType;

    #[test]
    fn query_padding_reaches_block_boundary() {
        let mut q = query("some.fairly.long.name.example.com.", RecordType::A);
        pad_to_block(&mut q, QUERY_BLOCK, usize::MAX).unwrap();
        let wire = q.to_vec().unwrap();
        assert_eq!(wire.len() % QUERY_BLOCK, 0);
    }

    #[test]
    fn padding_respects_the_cap() {
        let mut q = query("example.com.", RecordType::A);
        pad_to_block(&mut q, RESPONSE_BLOCK, 100).unwrap();
        let wire = q.to_vec().unwrap();
        assert!(wire.len() <= 100);
    }

    #[test]
    fn strip_removes_existing_padding() {
        let mut q = query("example.com.", RecordType::A);
        pad_to_block(&mut q, QUERY_BLOCK, usize::MAX).unwrap();
        crate::modifier::remove_option(&mut q, EdnsCode::Padding);
        assert!(crate::modifier::get_option(&q, EdnsCode::Padding).is_none());
    }
}

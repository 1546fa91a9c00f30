//! EDNS0 Client Subnet manipulation.
//!
//! The subnet option is handled on its wire form (RFC 7871 §6): family,
//! source prefix, scope prefix, then the address truncated to the prefix.
//! Keeping the codec local makes encode/decode bit-exact independent of
//! how the DNS library models the option.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;

use crate::error::Result;
use crate::{ClientInfo, Resolver, SharedResolver};

const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

/// Decoded client subnet option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    pub address: IpAddr,
    pub source_prefix: u8,
    pub scope_prefix: u8,
}

/// Zero host bits beyond `prefix`.
pub fn mask_address(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let prefix = prefix.min(32) as u32;
            let bits = u32::from(v4);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let prefix = prefix.min(128) as u32;
            let bits = u128::from(v6);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}

pub fn decode(bytes: &[u8]) -> Option<Subnet> {
    if bytes.len() < 4 {
        return None;
    }
    let family = u16::from_be_bytes([bytes[0], bytes[1]]);
    let source_prefix = bytes[2];
    let scope_prefix = bytes[3];
    let addr_bytes = &bytes[4..];
    let address = match family {
        FAMILY_IPV4 => {
            let mut octets = [0u8; 4];
            let n = addr_bytes.len().min(4);
            octets[..n].copy_from_slice(&addr_bytes[..n]);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        FAMILY_IPV6 => {
            let mut octets = [0u8; 16];
            let n = addr_bytes.len().min(16);
            octets[..n].copy_from_slice(&addr_bytes[..n]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(Subnet {
        address,
        source_prefix,
        scope_prefix,
    })
}

pub fn encode(subnet: &Subnet) -> Vec<u8> {
    let masked = mask_address(subnet.address, subnet.source_prefix);
    let (family, octets): (u16, Vec<u8>) = match masked {
        IpAddr::V4(v4) => (FAMILY_IPV4, v4.octets().to_vec()),
        IpAddr::V6(v6) => (FAMILY_IPV6, v6.octets().to_vec()),
    };
    let addr_len = ((subnet.source_prefix as usize) + 7) / 8;
    let mut out = Vec::with_capacity(4 + addr_len);
    out.extend_from_slice(&family.to_be_bytes());
    out.push(subnet.source_prefix);
    out.push(subnet.scope_prefix);
    out.extend_from_slice(&octets[..addr_len.min(octets.len())]);
    out
}

/// The client subnet attached to a message, if any.
pub fn subnet_from_message(msg: &Message) -> Option<Subnet> {
    super::get_option(msg, EdnsCode::Subnet).and_then(|bytes| decode(&bytes))
}

fn set_subnet(msg: &mut Message, subnet: &Subnet) {
    super::set_option(msg, u16::from(EdnsCode::Subnet), encode(subnet));
}

/// What the modifier does to the query's subnet option.
#[derive(Debug, Clone)]
pub enum EcsMode {
    /// Remove every subnet option.
    Delete,
    /// Attach the configured address (or the client source when absent),
    /// masked to the prefix for its family. Replaces an existing option.
    Add { address: Option<IpAddr> },
    /// Like `Add`, but an existing option is left alone.
    AddIfMissing { address: Option<IpAddr> },
    /// Narrow an existing option to the configured prefixes.
    Privacy,
}

pub struct EcsModifier {
    id: String,
    resolver: SharedResolver,
    mode: EcsMode,
    prefix4: u8,
    prefix6: u8,
}

impl EcsModifier {
    pub fn new(
        id: impl Into<String>,
        resolver: SharedResolver,
        mode: EcsMode,
        prefix4: u8,
        prefix6: u8,
    ) -> Self {
        EcsModifier {
            id: id.into(),
            resolver,
            mode,
            prefix4,
            prefix6,
        }
    }

    fn prefix_for(&self, addr: IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => self.prefix4,
            IpAddr::V6(_) => self.prefix6,
        }
    }

    fn apply(&self, query: &mut Message, client: &ClientInfo) {
        match &self.mode {
            EcsMode::Delete => super::remove_option(query, EdnsCode::Subnet),
            EcsMode::Add { address } => {
                let address = address.unwrap_or_else(|| client.source_addr.ip());
                let prefix = self.prefix_for(address);
                set_subnet(
                    query,
                    &Subnet {
                        address,
                        source_prefix: prefix,
                        scope_prefix: 0,
                    },
                );
            }
            EcsMode::AddIfMissing { address } => {
                if subnet_from_message(query).is_none() {
                    let address = address.unwrap_or_else(|| client.source_addr.ip());
                    let prefix = self.prefix_for(address);
                    set_subnet(
                        query,
                        &Subnet {
                            address,
                            source_prefix: prefix,
                            scope_prefix: 0,
                        },
                    );
                }
            }
            EcsMode::Privacy => {
                if let Some(existing) = subnet_from_message(query) {
                    let prefix = self.prefix_for(existing.address).min(existing.source_prefix);
                    set_subnet(
                        query,
                        &Subnet {
                            address: existing.address,
                            source_prefix: prefix,
                            scope_prefix: existing.scope_prefix,
                        },
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Resolver for EcsModifier {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let mut modified = query.clone();
        self.apply(&mut modified, client);
        self.resolver.resolve(&modified, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{client, query, MockResolver};
    use hickory_proto::rr::RecordType;

    #[test]
    fn subnet_roundtrip_masks_host_bits() {
        let subnet = Subnet {
            address: "192.168.1.100".parse().unwrap(),
            source_prefix: 24,
            scope_prefix: 0,
        };
        let decoded = decode(&encode(&subnet)).unwrap();
        assert_eq!(decoded.address, "192.168.1.0".parse::<IpAddr>().unwrap());
        assert_eq!(decoded.source_prefix, 24);
    }

    #[tokio::test]
    async fn add_uses_client_source_when_unconfigured() {
        let upstream = MockResolver::echoing("up");
        let modifier = EcsModifier::new("ecs", upstream, EcsMode::Add { address: None }, 24, 56);
        let q = query("example.com.", RecordType::A);
        let mut seen = q.clone();
        modifier.apply(&mut seen, &client());
        let subnet = subnet_from_message(&seen).unwrap();
        assert_eq!(subnet.address, "127.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(subnet.source_prefix, 24);
    }

    #[tokio::test]
    async fn privacy_narrows_existing_option() {
        let upstream = MockResolver::echoing("up");
        let modifier = EcsModifier::new("ecs", upstream, EcsMode::Privacy, 16, 48);
        let mut q = query("example.com.", RecordType::A);
        set_subnet(
            &mut q,
            &Subnet {
                address: "10.20.30.40".parse().unwrap(),
                source_prefix: 32,
                scope_prefix: 0,
            },
        );
        let mut seen = q.clone();
        modifier.apply(&mut seen, &client());
        let subnet = subnet_from_message(&seen).unwrap();
        assert_eq!(subnet.source_prefix, 16);
        assert_eq!(subnet.address, "10.20.0.0".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn delete_strips_the_option() {
        let upstream = MockResolver::echoing("up");
        let modifier = EcsModifier::new("ecs", upstream, EcsMode::Delete, 24, 56);
        let mut q = query("example.com.", RecordType::A);
        set_subnet(
            &mut q,
            &Subnet {
                address: "10.0.0.1".parse().unwrap(),
                source_prefix: 32,
                scope_prefix: 0,
            },
        );
        let mut seen = q.clone();
        modifier.apply(&mut seen, &client());
        assert!(subnet_from_message(&seen).is_none());
    }
}

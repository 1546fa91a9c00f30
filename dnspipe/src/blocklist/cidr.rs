//! CIDR prefix trie for response-address matching.
//!
//! A binary trie per address family. The match mode decides whether the
//! least or the most specific covering prefix supplies the reported rule.

use std::net::IpAddr;

use ipnet::IpNet;

use super::IpDb;
use crate::error::Result;
use crate::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrefixMode {
    #[default]
    Longest,
    Shortest,
}

#[derive(Default)]
struct Node {
    children: [Option<usize>; 2],
    rule: Option<String>,
}

#[derive(Default)]
struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    fn new() -> Trie {
        Trie {
            nodes: vec![Node::default()],
        }
    }

    fn insert(&mut self, bits: u128, prefix_len: u8, width: u8, rule: String) {
        let mut node = 0;
        for i in 0..prefix_len {
            let bit = ((bits >> (width - 1 - i)) & 1) as usize;
            node = match self.nodes[node].children[bit] {
                Some(next) => next,
                None => {
                    self.nodes.push(Node::default());
                    let next = self.nodes.len() - 1;
                    self.nodes[node].children[bit] = Some(next);
                    next
                }
            };
        }
        self.nodes[node].rule = Some(rule);
    }

    fn lookup(&self, bits: u128, width: u8, mode: PrefixMode) -> Option<String> {
        let mut node = 0;
        let mut found = self.nodes[0].rule.clone();
        for i in 0..width {
            if matches!(mode, PrefixMode::Shortest) && found.is_some() {
                return found;
            }
            let bit = ((bits >> (width - 1 - i)) & 1) as usize;
            match self.nodes[node].children[bit] {
                Some(next) => {
                    node = next;
                    if let Some(rule) = &self.nodes[node].rule {
                        found = Some(rule.clone());
                    }
                }
                None => break,
            }
        }
        found
    }
}

pub struct CidrDb {
    v4: Trie,
    v6: Trie,
    mode: PrefixMode,
}

fn addr_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => (u32::from(v4) as u128, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

impl CidrDb {
    pub fn parse(rules: &[String], mode: PrefixMode) -> Result<CidrDb> {
        let mut db = CidrDb {
            v4: Trie::new(),
            v6: Trie::new(),
            mode,
        };
        for rule in rules {
            // Bare addresses are accepted as host routes.
            let net: IpNet = match rule.parse() {
                Ok(net) => net,
                Err(_) => rule
                    .parse::<IpAddr>()
                    .map(|a| IpNet::from(a))
                    .map_err(|_| ResolveError::config(format!("bad CIDR rule {:?}", rule)))?,
            };
            let (bits, _) = addr_bits(net.network());
            match net {
                IpNet::V4(_) => db.v4.insert(bits, net.prefix_len(), 32, rule.clone()),
                IpNet::V6(_) => db.v6.insert(bits, net.prefix_len(), 128, rule.clone()),
            }
        }
        Ok(db)
    }
}

impl IpDb for CidrDb {
    fn match_ip(&self, addr: IpAddr) -> Option<String> {
        let (bits, width) = addr_bits(addr);
        match addr {
            IpAddr::V4(_) => self.v4.lookup(bits, width, self.mode),
            IpAddr::V6(_) => self.v6.lookup(bits, width, self.mode),
        }
    }

    fn rule_count(&self) -> usize {
        self.v4.nodes.len() + self.v6.nodes.len()
    }
}

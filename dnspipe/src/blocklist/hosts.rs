//! Hosts-file-style matcher with spoof targets.
//!
//! Rules look like hosts(5) lines: an address followed by names. A name
//! can carry several addresses across lines (capped per family); queries
//! for a listed name are answered with those addresses, and PTR queries
//! for a listed address are answered with the first name it was given.
//! Unspecified addresses (`0.0.0.0`, `::`) mark a name for NXDOMAIN.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

use hickory_proto::rr::{Name, RecordType};

use super::{NameDb, NameMatch};
use crate::error::Result;
use crate::ResolveError;

/// Spoof targets kept per name and family.
const MAX_ADDRS_PER_NAME: usize = 8;

#[derive(Default)]
pub struct HostsDb {
    names: HashMap<String, Vec<IpAddr>>,
    reverse: HashMap<IpAddr, Name>,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl HostsDb {
    pub fn parse(rules: &[String]) -> Result<HostsDb> {
        let mut db = HostsDb::default();
        for rule in rules {
            let mut fields = rule.split_whitespace();
            let Some(addr) = fields.next() else { continue };
            let addr = IpAddr::from_str(addr)
                .map_err(|e| ResolveError::config(format!("bad address in hosts rule {:?}: {}", rule, e)))?;
            let mut any_name = false;
            for name in fields {
                any_name = true;
                let key = normalize(name);
                let addrs = db.names.entry(key.clone()).or_default();
                let same_family = addrs.iter().filter(|a| a.is_ipv4() == addr.is_ipv4()).count();
                if same_family < MAX_ADDRS_PER_NAME {
                    addrs.push(addr);
                }
                if !addr.is_unspecified() {
                    let fqdn = Name::from_str(&format!("{}.", key)).map_err(|e| {
                        ResolveError::config(format!("bad name in hosts rule {:?}: {}", rule, e))
                    })?;
                    db.reverse.entry(addr).or_insert(fqdn);
                }
            }
            if !any_name {
                return Err(ResolveError::config(format!(
                    "hosts rule with no names: {:?}",
                    rule
                )));
            }
        }
        Ok(db)
    }
}

/// Parse `d.c.b.a.in-addr.arpa.` / nibble `ip6.arpa.` names back into an
/// address.
fn arpa_to_addr(name: &Name) -> Option<IpAddr> {
    let name = normalize(&name.to_string());
    if let Some(v4) = name.strip_suffix(".in-addr.arpa") {
        let mut octets: Vec<u8> = Vec::with_capacity(4);
        for part in v4.rsplit('.') {
            octets.push(part.parse().ok()?);
        }
        if octets.len() != 4 {
            return None;
        }
        return Some(IpAddr::from([octets[0], octets[1], octets[2], octets[3]]));
    }
    if let Some(v6) = name.strip_suffix(".ip6.arpa") {
        let nibbles: Vec<u8> = v6
            .rsplit('.')
            .map(|n| u8::from_str_radix(n, 16).ok())
            .collect::<Option<_>>()?;
        if nibbles.len() != 32 {
            return None;
        }
        let mut octets = [0u8; 16];
        for (i, pair) in nibbles.chunks(2).enumerate() {
            octets[i] = (pair[0] << 4) | pair[1];
        }
        return Some(IpAddr::from(octets));
    }
    None
}

impl NameDb for HostsDb {
    fn match_name(&self, name: &Name) -> Option<NameMatch> {
        let key = normalize(&name.to_string());
        let addrs = self.names.get(&key)?;
        Some(NameMatch {
            rule: key,
            spoof: addrs.iter().copied().filter(|a| !a.is_unspecified()).collect(),
            ptr: None,
        })
    }

    fn match_query(&self, name: &Name, qtype: RecordType) -> Option<NameMatch> {
        if qtype == RecordType::PTR {
            let addr = arpa_to_addr(name)?;
            let target = self.reverse.get(&addr)?;
            return Some(NameMatch {
                rule: addr.to_string(),
                spoof: Vec::new(),
                ptr: Some(target.clone()),
            });
        }
        self.match_name(name)
    }

    fn rule_count(&self) -> usize {
        self.names.len()
    }
}

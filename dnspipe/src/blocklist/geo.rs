//! MMDB-backed geo and ASN matchers.
//!
//! Rules are identifiers to block: ISO country codes (`CN`), continent
//! codes (`AS`), GeoName IDs (`1814991`) for a geo database, or AS
//! numbers (`AS4134` / `4134`) for an ASN database. The MMDB file itself
//! is configuration, not a rule list, so these DBs take their rules at
//! construction and are swapped out wholesale on reload like the rest.

use std::collections::HashSet;
use std::net::IpAddr;

use maxminddb::geoip2;

use super::IpDb;
use crate::error::Result;
use crate::ResolveError;

pub struct GeoDb {
    reader: maxminddb::Reader<Vec<u8>>,
    rules: HashSet<String>,
}

impl GeoDb {
    pub fn open(mmdb_path: &str, rules: &[String]) -> Result<GeoDb> {
        let reader = maxminddb::Reader::open_readfile(mmdb_path)
            .map_err(|e| ResolveError::config(format!("cannot open {}: {}", mmdb_path, e)))?;
        Ok(GeoDb {
            reader,
            rules: rules.iter().map(|r| r.to_ascii_uppercase()).collect(),
        })
    }
}

impl IpDb for GeoDb {
    fn match_ip(&self, addr: IpAddr) -> Option<String> {
        let city: geoip2::City = self.reader.lookup(addr).ok()?;
        let mut candidates: Vec<String> = Vec::new();
        if let Some(continent) = &city.continent {
            if let Some(code) = continent.code {
                candidates.push(code.to_ascii_uppercase());
            }
            if let Some(id) = continent.geoname_id {
                candidates.push(id.to_string());
            }
        }
        if let Some(country) = &city.country {
            if let Some(code) = country.iso_code {
                candidates.push(code.to_ascii_uppercase());
            }
            if let Some(id) = country.geoname_id {
                candidates.push(id.to_string());
            }
        }
        if let Some(city) = &city.city {
            if let Some(id) = city.geoname_id {
                candidates.push(id.to_string());
            }
        }
        candidates.into_iter().find(|c| self.rules.contains(c))
    }

    fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

pub struct AsnDb {
    reader: maxminddb::Reader<Vec<u8>>,
    rules: HashSet<u32>,
}

impl AsnDb {
    pub fn open(mmdb_path: &str, rules: &[String]) -> Result<AsnDb> {
        let reader = maxminddb::Reader::open_readfile(mmdb_path)
            .map_err(|e| ResolveError::config(format!("cannot open {}: {}", mmdb_path, e)))?;
        let rules = rules
            .iter()
            .map(|r| {
                r.trim_start_matches("AS")
                    .trim_start_matches("as")
                    .parse::<u32>()
                    .map_err(|_| ResolveError::config(format!("bad ASN rule {:?}", r)))
            })
            .collect::<Result<HashSet<u32>>>()?;
        Ok(AsnDb { reader, rules })
    }
}

impl IpDb for AsnDb {
    fn match_ip(&self, addr: IpAddr) -> Option<String> {
        let asn: geoip2::Asn = self.reader.lookup(addr).ok()?;
        let number = asn.autonomous_system_number?;
        if self.rules.contains(&number) {
            Some(format!("AS{}", number))
        } else {
            None
        }
    }

    fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

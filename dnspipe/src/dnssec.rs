//! DNSSEC validating middleware.
//!
//! Upgrades queries with the DO bit, verifies answer RRset signatures and
//! walks the DNSKEY/DS chain up to a configured trust anchor. Responses
//! from unsigned zones pass through unchanged when the zone cut carries no
//! DS records (insecure delegation); everything else must validate or the
//! client gets SERVFAIL. A log-only mode reports failures but serves the
//! original response.
//!
//! Verification works on the canonical wire form of the records (RFC 4034
//! §6): DNSSEC rdata is re-encoded with canonical names and parsed into
//! small local structs, which keeps signature input construction exact.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hickory_proto::op::{Edns, Message, Query, ResponseCode};
use hickory_proto::rr::{Name, Record, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};

use crate::error::Result;
use crate::message;
use crate::{ClientInfo, ResolveError, Resolver, SharedResolver};

/// Maximum zone cuts walked before giving up on a chain.
const MAX_CHAIN_DEPTH: usize = 16;

/// DNSKEY algorithm numbers supported for validation.
const ALG_RSASHA256: u8 = 8;
const ALG_ECDSAP256SHA256: u8 = 13;
const ALG_ECDSAP384SHA384: u8 = 14;
const ALG_ED25519: u8 = 15;

/// DS digest types.
const DIGEST_SHA1: u8 = 1;
const DIGEST_SHA256: u8 = 2;
const DIGEST_SHA384: u8 = 4;

/// A configured trust anchor in DS form.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    pub zone: Name,
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

impl TrustAnchor {
    /// The root KSK-2017 anchor (key tag 20326).
    pub fn root() -> TrustAnchor {
        TrustAnchor {
            zone: Name::root(),
            key_tag: 20326,
            algorithm: ALG_RSASHA256,
            digest_type: DIGEST_SHA256,
            digest: hex_decode("e06d44b80b8f1d39a95c0b0d7c65d08458e880409bbc683457104237c7f8ec8d"),
        }
    }
}

fn hex_decode(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex literal"))
        .collect()
}

/// RRSIG rdata parsed from its canonical wire form.
struct Rrsig {
    owner: Name,
    type_covered: RecordType,
    algorithm: u8,
    labels: u8,
    original_ttl: u32,
    expiration: u32,
    inception: u32,
    key_tag: u16,
    signer: Name,
    signature: Vec<u8>,
    /// The rdata bytes up to and including the signer name, i.e. the
    /// RRSIG part of the signed data.
    signed_prefix: Vec<u8>,
}

struct Dnskey {
    flags: u16,
    protocol: u8,
    algorithm: u8,
    public_key: Vec<u8>,
    /// Full rdata wire form, used for key tags and DS digests.
    wire: Vec<u8>,
}

struct Ds {
    key_tag: u16,
    algorithm: u8,
    digest_type: u8,
    digest: Vec<u8>,
}

/// Canonical wire form of a record's rdata (lowercased names, no
/// compression).
fn rdata_wire(record: &Record) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = BinEncoder::new(&mut buf);
        encoder.set_canonical_names(true);
        record.data().emit(&mut encoder)?;
    }
    Ok(buf)
}

fn canonical_name_wire(name: &Name) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = BinEncoder::new(&mut buf);
        encoder.set_canonical_names(true);
        name.emit(&mut encoder)?;
    }
    Ok(buf)
}

/// Read an uncompressed name from `wire` starting at `at`; returns the
/// name and the offset past it.
fn parse_wire_name(wire: &[u8], mut at: usize) -> Result<(Name, usize)> {
    let mut labels: Vec<String> = Vec::new();
    loop {
        let len = *wire
            .get(at)
            .ok_or_else(|| ResolveError::protocol("truncated name in rdata"))? as usize;
        at += 1;
        if len == 0 {
            break;
        }
        if len > 63 || at + len > wire.len() {
            return Err(ResolveError::protocol("malformed name in rdata"));
        }
        labels.push(String::from_utf8_lossy(&wire[at..at + len]).into_owned());
        at += len;
    }
    let mut dotted = labels.join(".");
    dotted.push('.');
    let name = Name::from_str(&dotted).map_err(|e| ResolveError::protocol(format!("bad name: {}", e)))?;
    Ok((name, at))
}

fn be16(wire: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([wire[at], wire[at + 1]])
}

fn be32(wire: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([wire[at], wire[at + 1], wire[at + 2], wire[at + 3]])
}

impl Rrsig {
    fn parse(record: &Record) -> Result<Rrsig> {
        let wire = rdata_wire(record)?;
        if wire.len() < 18 {
            return Err(ResolveError::protocol("RRSIG rdata too short"));
        }
        let (signer, sig_start) = parse_wire_name(&wire, 18)?;
        Ok(Rrsig {
            owner: record.name().to_lowercase(),
            type_covered: RecordType::from(be16(&wire, 0)),
            algorithm: wire[2],
            labels: wire[3],
            original_ttl: be32(&wire, 4),
            expiration: be32(&wire, 8),
            inception: be32(&wire, 12),
            key_tag: be16(&wire, 16),
            signer,
            signature: wire[sig_start..].to_vec(),
            signed_prefix: wire[..sig_start].to_vec(),
        })
    }

    fn valid_at(&self, now: u32) -> bool {
        self.inception <= now && now <= self.expiration
    }
}

impl Dnskey {
    fn parse(record: &Record) -> Result<Dnskey> {
        let wire = rdata_wire(record)?;
        if wire.len() < 5 {
            return Err(ResolveError::protocol("DNSKEY rdata too short"));
        }
        Ok(Dnskey {
            flags: be16(&wire, 0),
            protocol: wire[2],
            algorithm: wire[3],
            public_key: wire[4..].to_vec(),
            wire,
        })
    }

    fn is_zone_key(&self) -> bool {
        self.flags & 0x0100 != 0 && self.protocol == 3
    }

    /// RFC 4034 appendix B key tag.
    fn key_tag(&self) -> u16 {
        let mut acc: u32 = 0;
        for (i, byte) in self.wire.iter().enumerate() {
            if i & 1 == 0 {
                acc += (*byte as u32) << 8;
            } else {
                acc += *byte as u32;
            }
        }
        acc += (acc >> 16) & 0xffff;
        (acc & 0xffff) as u16
    }

    /// Digest of this key as a DS record would carry it.
    fn digest(&self, owner: &Name, digest_type: u8) -> Result<Vec<u8>> {
        let mut input = canonical_name_wire(owner)?;
        input.extend_from_slice(&self.wire);
        let algorithm = match digest_type {
            DIGEST_SHA1 => &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            DIGEST_SHA256 => &ring::digest::SHA256,
            DIGEST_SHA384 => &ring::digest::SHA384,
            other => {
                return Err(ResolveError::protocol(format!(
                    "unsupported DS digest type {}",
                    other
                )))
            }
        };
        Ok(ring::digest::digest(algorithm, &input).as_ref().to_vec())
    }

    /// Verify `signature` over `signed_data` with this key.
    fn verify(&self, signed_data: &[u8], signature: &[u8]) -> Result<()> {
        let bad = |_| ResolveError::protocol("signature verification failed");
        match self.algorithm {
            ALG_RSASHA256 => {
                // Wire format: exponent length (1 or 3 bytes), exponent,
                // modulus.
                let key = &self.public_key;
                if key.is_empty() {
                    return Err(ResolveError::protocol("empty RSA key"));
                }
                let (e, n) = if key[0] != 0 {
                    let len = key[0] as usize;
                    (&key[1..1 + len], &key[1 + len..])
                } else {
                    if key.len() < 3 {
                        return Err(ResolveError::protocol("malformed RSA key"));
                    }
                    let len = be16(key, 1) as usize;
                    (&key[3..3 + len], &key[3 + len..])
                };
                ring::signature::RsaPublicKeyComponents { n, e }
                    .verify(&ring::signature::RSA_PKCS1_2048_8192_SHA256, signed_data, signature)
                    .map_err(bad)
            }
            ALG_ECDSAP256SHA256 | ALG_ECDSAP384SHA384 => {
                // Uncompressed point without the 0x04 marker on the wire.
                let mut point = Vec::with_capacity(self.public_key.len() + 1);
                point.push(0x04);
                point.extend_from_slice(&self.public_key);
                let algorithm: &dyn ring::signature::VerificationAlgorithm =
                    if self.algorithm == ALG_ECDSAP256SHA256 {
                        &ring::signature::ECDSA_P256_SHA256_FIXED
                    } else {
                        &ring::signature::ECDSA_P384_SHA384_FIXED
                    };
                ring::signature::UnparsedPublicKey::new(algorithm, &point)
                    .verify(signed_data, signature)
                    .map_err(bad)
            }
            ALG_ED25519 => ring::signature::UnparsedPublicKey::new(
                &ring::signature::ED25519,
                &self.public_key,
            )
            .verify(signed_data, signature)
            .map_err(bad),
            other => Err(ResolveError::protocol(format!(
                "unsupported DNSKEY algorithm {}",
                other
            ))),
        }
    }
}

impl Ds {
    fn parse(record: &Record) -> Result<Ds> {
        let wire = rdata_wire(record)?;
        if wire.len() < 5 {
            return Err(ResolveError::protocol("DS rdata too short"));
        }
        Ok(Ds {
            key_tag: be16(&wire, 0),
            algorithm: wire[2],
            digest_type: wire[3],
            digest: wire[4..].to_vec(),
        })
    }

    fn matches(&self, owner: &Name, key: &Dnskey) -> bool {
        self.key_tag == key.key_tag()
            && self.algorithm == key.algorithm
            && key
                .digest(owner, self.digest_type)
                .map(|digest| digest == self.digest)
                .unwrap_or(false)
    }
}

/// Build the RFC 4034 §3.1.8.1 signature input for one RRset.
fn signed_data(rrsig: &Rrsig, records: &[&Record]) -> Result<Vec<u8>> {
    let mut data = rrsig.signed_prefix.clone();

    let mut members: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(records.len());
    for record in records {
        // Wildcard-expanded owners are signed under their wildcard form.
        let owner = record.name().to_lowercase();
        let owner = if (rrsig.labels as usize) < owner.num_labels() as usize {
            let mut labels: Vec<String> = owner.iter().map(|l| String::from_utf8_lossy(l).into_owned()).collect();
            while labels.len() > rrsig.labels as usize {
                labels.remove(0);
            }
            Name::from_str(&format!("*.{}.", labels.join(".")))
                .map_err(|e| ResolveError::protocol(format!("wildcard owner: {}", e)))?
        } else {
            owner
        };
        let mut prefix = canonical_name_wire(&owner)?;
        prefix.extend_from_slice(&u16::from(record.record_type()).to_be_bytes());
        prefix.extend_from_slice(&u16::from(record.dns_class()).to_be_bytes());
        prefix.extend_from_slice(&rrsig.original_ttl.to_be_bytes());
        let rdata = rdata_wire(record)?;
        members.push((prefix, rdata));
    }
    // Canonical RRset order sorts by rdata.
    members.sort_by(|a, b| a.1.cmp(&b.1));
    for (prefix, rdata) in members {
        data.extend_from_slice(&prefix);
        data.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rdata);
    }
    Ok(data)
}

/// Outcome of authenticating one zone's key set.
enum ZoneTrust {
    Secure(Vec<Dnskey>),
    /// The chain ended at an unsigned delegation.
    Insecure,
}

pub struct DnssecValidator {
    id: String,
    resolver: SharedResolver,
    anchors: Vec<TrustAnchor>,
    /// Report failures but serve the original response.
    log_only: bool,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl DnssecValidator {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, anchors: Vec<TrustAnchor>, log_only: bool) -> Self {
        let anchors = if anchors.is_empty() {
            vec![TrustAnchor::root()]
        } else {
            anchors
        };
        DnssecValidator {
            id: id.into(),
            resolver,
            anchors,
            log_only,
        }
    }

    async fn fetch(&self, name: &Name, rtype: RecordType, client: &ClientInfo) -> Result<Message> {
        let mut query = Message::new();
        query.set_id(rand::random());
        query.set_recursion_desired(true);
        query.add_query(Query::query(name.clone(), rtype));
        let edns = query.extensions_mut().get_or_insert_with(Edns::new);
        edns.set_max_payload(1232);
        edns.set_dnssec_ok(true);
        match self.resolver.resolve(&query, client).await? {
            Some(response) => Ok(response),
            None => Err(ResolveError::protocol("chain query was dropped")),
        }
    }

    fn anchor_for(&self, zone: &Name) -> Option<&TrustAnchor> {
        self.anchors.iter().find(|a| &a.zone == zone)
    }

    /// Authenticate the DNSKEY set of `zone`, walking DS records toward a
    /// trust anchor.
    fn authenticate_zone<'a>(
        &'a self,
        zone: Name,
        client: &'a ClientInfo,
        depth: usize,
        now: u32,
    ) -> BoxFuture<'a, Result<ZoneTrust>> {
        Box::pin(async move {
            if depth > MAX_CHAIN_DEPTH {
                return Err(ResolveError::protocol("authentication chain too deep"));
            }
            let key_response = self.fetch(&zone, RecordType::DNSKEY, client).await?;
            let key_records: Vec<&Record> = key_response
                .answers()
                .iter()
                .filter(|r| r.record_type() == RecordType::DNSKEY && r.name() == &zone)
                .collect();
            if key_records.is_empty() {
                return Ok(ZoneTrust::Insecure);
            }
            let keys: Vec<Dnskey> = key_records
                .iter()
                .map(|r| Dnskey::parse(r))
                .collect::<Result<_>>()?;

            // The key set must be self-signed by one of its own keys.
            let key_sigs: Vec<Rrsig> = covering_sigs(&key_response, &zone, RecordType::DNSKEY)?;
            let selfsigned = key_sigs.iter().filter(|s| s.valid_at(now)).any(|sig| {
                keys.iter()
                    .filter(|k| k.is_zone_key() && k.key_tag() == sig.key_tag && k.algorithm == sig.algorithm)
                    .any(|key| {
                        signed_data(sig, &key_records)
                            .and_then(|data| key.verify(&data, &sig.signature))
                            .is_ok()
                    })
            });
            if !selfsigned {
                return Err(ResolveError::protocol(format!(
                    "DNSKEY set of {} has no valid self-signature",
                    zone
                )));
            }

            // Anchored zone: one of the keys must match a configured DS.
            if let Some(anchor) = self.anchor_for(&zone) {
                let trusted = keys.iter().any(|key| {
                    key.key_tag() == anchor.key_tag
                        && key.algorithm == anchor.algorithm
                        && key
                            .digest(&zone, anchor.digest_type)
                            .map(|d| d == anchor.digest)
                            .unwrap_or(false)
                });
                return if trusted {
                    Ok(ZoneTrust::Secure(keys))
                } else {
                    Err(ResolveError::protocol(format!(
                        "no DNSKEY of {} matches the trust anchor",
                        zone
                    )))
                };
            }

            // Otherwise the parent must vouch for the zone via DS.
            let ds_response = self.fetch(&zone, RecordType::DS, client).await?;
            let ds_records: Vec<&Record> = ds_response
                .answers()
                .iter()
                .filter(|r| r.record_type() == RecordType::DS && r.name() == &zone)
                .collect();
            if ds_records.is_empty() {
                log::debug!("dnssec {}: no DS at zone cut {}, insecure delegation", self.id, zone);
                return Ok(ZoneTrust::Insecure);
            }
            let ds_sigs = covering_sigs(&ds_response, &zone, RecordType::DS)?;
            let parent = ds_sigs
                .iter()
                .find(|s| s.valid_at(now))
                .map(|s| s.signer.clone())
                .unwrap_or_else(|| zone.base_name());
            let parent_keys = match self.authenticate_zone(parent, client, depth + 1, now).await? {
                ZoneTrust::Secure(keys) => keys,
                ZoneTrust::Insecure => return Ok(ZoneTrust::Insecure),
            };
            let ds_valid = ds_sigs.iter().filter(|s| s.valid_at(now)).any(|sig| {
                parent_keys
                    .iter()
                    .filter(|k| k.key_tag() == sig.key_tag && k.algorithm == sig.algorithm)
                    .any(|key| {
                        signed_data(sig, &ds_records)
                            .and_then(|data| key.verify(&data, &sig.signature))
                            .is_ok()
                    })
            });
            if !ds_valid {
                return Err(ResolveError::protocol(format!(
                    "DS set for {} does not validate against its parent",
                    zone
                )));
            }
            let linked = ds_records
                .iter()
                .filter_map(|r| Ds::parse(r).ok())
                .any(|ds| keys.iter().any(|key| ds.matches(&zone, key)));
            if !linked {
                return Err(ResolveError::protocol(format!(
                    "no DNSKEY of {} matches its DS records",
                    zone
                )));
            }
            Ok(ZoneTrust::Secure(keys))
        })
    }

    /// Validate every signed RRset in the answer section.
    async fn validate(&self, response: &Message, client: &ClientInfo) -> Result<ZoneTrust> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs() as u32;

        let sigs: Vec<Rrsig> = response
            .answers()
            .iter()
            .filter(|r| r.record_type() == RecordType::RRSIG)
            .map(Rrsig::parse)
            .collect::<Result<_>>()?;
        if sigs.is_empty() {
            // Unsigned answer: secure zones must not produce these, so the
            // decision rests on whether the question's zone is signed.
            let Some(q) = message::first_question(response) else {
                return Ok(ZoneTrust::Insecure);
            };
            let zone = q.name().base_name();
            return match self.authenticate_zone(zone, client, 0, now).await? {
                ZoneTrust::Secure(_) => Err(ResolveError::protocol(
                    "unsigned answer from a signed zone".to_string(),
                )),
                ZoneTrust::Insecure => Ok(ZoneTrust::Insecure),
            };
        }

        for sig in sigs.iter().filter(|s| s.type_covered != RecordType::RRSIG) {
            if !sig.valid_at(now) {
                return Err(ResolveError::protocol("RRSIG outside its validity window"));
            }
            // Each signature covers the RRset of one type at its own
            // owner name.
            let rrset: Vec<&Record> = response
                .answers()
                .iter()
                .filter(|r| r.record_type() == sig.type_covered && r.name() == &sig.owner)
                .collect();
            if rrset.is_empty() {
                continue;
            }
            let keys = match self.authenticate_zone(sig.signer.clone(), client, 0, now).await? {
                ZoneTrust::Secure(keys) => keys,
                ZoneTrust::Insecure => return Ok(ZoneTrust::Insecure),
            };
            let verified = keys
                .iter()
                .filter(|k| k.key_tag() == sig.key_tag && k.algorithm == sig.algorithm)
                .any(|key| {
                    signed_data(sig, &rrset)
                        .and_then(|data| key.verify(&data, &sig.signature))
                        .is_ok()
                });
            if !verified {
                return Err(ResolveError::protocol(format!(
                    "RRset {}/{:?} failed signature validation",
                    rrset[0].name(),
                    sig.type_covered
                )));
            }
        }
        Ok(ZoneTrust::Secure(Vec::new()))
    }
}

fn covering_sigs(response: &Message, owner: &Name, covered: RecordType) -> Result<Vec<Rrsig>> {
    response
        .answers()
        .iter()
        .filter(|r| r.record_type() == RecordType::RRSIG && r.name() == owner)
        .map(Rrsig::parse)
        .collect::<Result<Vec<_>>>()
        .map(|sigs| sigs.into_iter().filter(|s| s.type_covered == covered).collect())
}

/// Remove validation records the client did not ask for.
fn strip_dnssec_records(response: &mut Message) {
    let keep = |r: &Record| {
        !matches!(
            r.record_type(),
            RecordType::RRSIG | RecordType::NSEC | RecordType::NSEC3
        )
    };
    let answers: Vec<Record> = response.take_answers().into_iter().filter(|r| keep(r)).collect();
    response.insert_answers(answers);
    let authority: Vec<Record> = response.take_name_servers().into_iter().filter(|r| keep(r)).collect();
    response.insert_name_servers(authority);
}

#[async_trait]
impl Resolver for DnssecValidator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let client_wants_dnssec = query
            .extensions()
            .as_ref()
            .map(|e| e.flags().dnssec_ok)
            .unwrap_or(false);

        let mut upgraded = query.clone();
        {
            let edns = upgraded.extensions_mut().get_or_insert_with(Edns::new);
            if edns.max_payload() < 1232 {
                edns.set_max_payload(1232);
            }
            edns.set_dnssec_ok(true);
        }
        let Some(response) = self.resolver.resolve(&upgraded, client).await? else {
            return Ok(None);
        };
        // Negative and error responses carry their proof in the authority
        // section; they pass through, the chain being checked only for
        // positive answers.
        if response.response_code() != ResponseCode::NoError || response.answers().is_empty() {
            return Ok(Some(response));
        }

        match self.validate(&response, client).await {
            Ok(ZoneTrust::Secure(_)) => {
                log::debug!("dnssec {}: validated response for {}", self.id, client.source_addr);
            }
            Ok(ZoneTrust::Insecure) => {
                log::debug!("dnssec {}: insecure delegation, passing through", self.id);
            }
            Err(err) if self.log_only => {
                log::warn!("dnssec {}: validation failed (log only): {}", self.id, err);
            }
            Err(err) => {
                log::warn!("dnssec {}: validation failed: {}", self.id, err);
                return Ok(Some(message::servfail(query)));
            }
        }
        let mut response = response;
        if !client_wants_dnssec {
            strip_dnssec_records(&mut response);
        }
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};

    #[test]
    fn key_tag_matches_reference_computation() {
        // Key tag over a fixed rdata blob, cross-checked against the
        // RFC 4034 appendix B algorithm by hand.
        let key = Dnskey {
            flags: 256,
            protocol: 3,
            algorithm: ALG_ECDSAP256SHA256,
            public_key: vec![1, 2, 3, 4],
            wire: vec![0x01, 0x00, 0x03, 0x0d, 1, 2, 3, 4],
        };
        let mut acc: u32 = 0;
        for (i, b) in key.wire.iter().enumerate() {
            acc += if i & 1 == 0 { (*b as u32) << 8 } else { *b as u32 };
        }
        acc += (acc >> 16) & 0xffff;
        assert_eq!(key.key_tag(), (acc & 0xffff) as u16);
    }

    #[test]
    fn rrsig_parses_from_wire_form() {
        // 18 fixed bytes, root signer name, then signature.
        let mut wire = Vec::new();
        wire.extend_from_slice(&u16::from(RecordType::A).to_be_bytes());
        wire.push(ALG_ECDSAP256SHA256);
        wire.push(2); // labels
        wire.extend_from_slice(&300u32.to_be_bytes());
        wire.extend_from_slice(&2000u32.to_be_bytes()); // expiration
        wire.extend_from_slice(&1000u32.to_be_bytes()); // inception
        wire.extend_from_slice(&20326u16.to_be_bytes());
        wire.push(0); // root name
        wire.extend_from_slice(&[0xaa; 64]);

        let (signer, at) = parse_wire_name(&wire, 18).unwrap();
        assert_eq!(signer, Name::root());
        assert_eq!(at, 19);
        assert_eq!(be32(&wire, 8), 2000);
        assert_eq!(be16(&wire, 16), 20326);
    }

    #[test]
    fn validity_window_is_inclusive() {
        let sig = Rrsig {
            owner: Name::root(),
            type_covered: RecordType::A,
            algorithm: ALG_ECDSAP256SHA256,
            labels: 2,
            original_ttl: 300,
            expiration: 2000,
            inception: 1000,
            key_tag: 1,
            signer: Name::root(),
            signature: Vec::new(),
            signed_prefix: Vec::new(),
        };
        assert!(sig.valid_at(1000));
        assert!(sig.valid_at(2000));
        assert!(!sig.valid_at(999));
        assert!(!sig.valid_at(2001));
    }

    #[tokio::test]
    async fn unsigned_zone_passes_through() {
        // The upstream answers every query, including the DNSKEY probe,
        // with a plain unsigned response: chain walking finds no keys and
        // declares the delegation insecure.
        let q = query("www.unsigned.example.", RecordType::A);
        let upstream = MockResolver::answering("up", a_response(&q, [192, 0, 2, 1], 300));
        let validator = DnssecValidator::new("dnssec", upstream, Vec::new(), false);
        let response = validator.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn do_bit_is_set_upstream() {
        struct AssertDo;
        #[async_trait]
        impl Resolver for AssertDo {
            fn id(&self) -> &str {
                "assert-do"
            }
            async fn resolve(&self, query: &Message, _c: &ClientInfo) -> Result<Option<Message>> {
                assert!(query.extensions().as_ref().map(|e| e.flags().dnssec_ok).unwrap_or(false));
                Ok(Some(crate::message::synthesize(query, ResponseCode::NoError)))
            }
        }
        let validator = DnssecValidator::new("dnssec", std::sync::Arc::new(AssertDo), Vec::new(), false);
        let q = query("example.com.", RecordType::A);
        validator.resolve(&q, &client()).await.unwrap();
    }
}

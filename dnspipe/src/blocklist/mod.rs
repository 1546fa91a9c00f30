//! Query and response blocklists.
//!
//! Both resolvers share the same matching core: an immutable DB snapshot
//! behind a writer lock. Readers take the lock only long enough to clone
//! the `Arc`, then query the snapshot lock-free; a background task
//! periodically rebuilds the DB from its loader and swaps the reference,
//! so every lookup after a successful reload sees the new snapshot.

mod cidr;
mod domain;
mod geo;
mod hosts;
mod loader;
mod regexlist;

pub use cidr::{CidrDb, PrefixMode};
pub use domain::DomainDb;
pub use geo::{AsnDb, GeoDb};
pub use hosts::HostsDb;
pub use loader::{FileLoader, HttpLoader, RuleLoader, StaticLoader};
pub use regexlist::RegexDb;

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, PTR};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, ResolveError, Resolver, SharedResolver};

/// Result of a successful match: the rule that fired plus optional spoof
/// targets from hosts-style rules.
#[derive(Debug, Clone)]
pub struct NameMatch {
    pub rule: String,
    pub spoof: Vec<IpAddr>,
    pub ptr: Option<Name>,
}

impl NameMatch {
    fn rule(rule: String) -> NameMatch {
        NameMatch {
            rule,
            spoof: Vec::new(),
            ptr: None,
        }
    }
}

/// Name-matching database (query names and response target names).
pub trait NameDb: Send + Sync {
    fn match_name(&self, name: &Name) -> Option<NameMatch>;

    /// Query-side match; hosts-style DBs answer PTR lookups here.
    fn match_query(&self, name: &Name, _qtype: RecordType) -> Option<NameMatch> {
        self.match_name(name)
    }

    fn rule_count(&self) -> usize;
}

/// Address-matching database (response A/AAAA records).
pub trait IpDb: Send + Sync {
    fn match_ip(&self, addr: IpAddr) -> Option<String>;
    fn rule_count(&self) -> usize;
}

/// Placeholder served when a list fails to load and `allow_failure` is on.
struct EmptyDb;

impl NameDb for EmptyDb {
    fn match_name(&self, _name: &Name) -> Option<NameMatch> {
        None
    }
    fn rule_count(&self) -> usize {
        0
    }
}

impl IpDb for EmptyDb {
    fn match_ip(&self, _addr: IpAddr) -> Option<String> {
        None
    }
    fn rule_count(&self) -> usize {
        0
    }
}

/// Formats for the name-matching DBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameDbKind {
    Domain,
    Regex,
    Hosts,
}

/// Formats for the address-matching DBs. The MMDB variants carry the
/// database file location; their rule lists select what to block.
#[derive(Debug, Clone)]
pub enum IpDbKind {
    Cidr(PrefixMode),
    Geo { mmdb_path: String },
    Asn { mmdb_path: String },
}

fn build_name_db(kind: NameDbKind, rules: &[String]) -> Result<Arc<dyn NameDb>> {
    Ok(match kind {
        NameDbKind::Domain => Arc::new(DomainDb::parse(rules)?),
        NameDbKind::Regex => Arc::new(RegexDb::parse(rules)?),
        NameDbKind::Hosts => Arc::new(HostsDb::parse(rules)?),
    })
}

fn build_ip_db(kind: &IpDbKind, rules: &[String]) -> Result<Arc<dyn IpDb>> {
    Ok(match kind {
        IpDbKind::Cidr(mode) => Arc::new(CidrDb::parse(rules, *mode)?),
        IpDbKind::Geo { mmdb_path } => Arc::new(GeoDb::open(mmdb_path, rules)?),
        IpDbKind::Asn { mmdb_path } => Arc::new(AsnDb::open(mmdb_path, rules)?),
    })
}

/// A reloadable matcher: loader + builder + the current snapshot.
pub struct Matcher<D: ?Sized + Send + Sync> {
    name: String,
    loader: Box<dyn RuleLoader>,
    build: Box<dyn Fn(&[String]) -> Result<Arc<D>> + Send + Sync>,
    current: RwLock<Arc<D>>,
}

pub type NameMatcher = Matcher<dyn NameDb>;
pub type IpMatcher = Matcher<dyn IpDb>;

impl<D: ?Sized + Send + Sync + 'static> Matcher<D> {
    async fn create(
        name: String,
        loader: Box<dyn RuleLoader>,
        build: Box<dyn Fn(&[String]) -> Result<Arc<D>> + Send + Sync>,
        empty: Arc<D>,
        allow_failure: bool,
    ) -> Result<Arc<Self>> {
        let initial = match loader.load().await.and_then(|rules| build(&rules)) {
            Ok(db) => db,
            Err(err) if allow_failure => {
                log::error!("list {}: initial load failed ({}), starting empty", name, err);
                empty
            }
            Err(err) => return Err(err),
        };
        Ok(Arc::new(Matcher {
            name,
            loader,
            build,
            current: RwLock::new(initial),
        }))
    }

    /// The current snapshot. Lock held only for the clone.
    pub fn db(&self) -> Arc<D> {
        Arc::clone(&self.current.read().expect("matcher lock poisoned"))
    }

    /// Rebuild from the loader and swap the snapshot in. On failure the
    /// previous snapshot stays in service.
    pub async fn reload(&self) -> Result<()> {
        let rules = self.loader.load().await?;
        let db = (self.build)(&rules)?;
        *self.current.write().expect("matcher lock poisoned") = db;
        log::info!(
            "list {}: reloaded {} rules from {}",
            self.name,
            rules.len(),
            self.loader.source()
        );
        Ok(())
    }

    /// Start periodic reloads. Failed reloads log and keep the last
    /// successful snapshot; the element itself owns the matcher, so the
    /// task stops when the matcher is dropped.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) {
        if period.is_zero() {
            return;
        }
        let matcher = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the initial load already happened
            loop {
                ticker.tick().await;
                let Some(matcher) = matcher.upgrade() else {
                    return;
                };
                if let Err(err) = matcher.reload().await {
                    log::error!("list {}: reload failed, keeping previous rules: {}", matcher.name, err);
                }
            }
        });
    }
}

impl NameMatcher {
    pub async fn load_names(
        name: impl Into<String>,
        kind: NameDbKind,
        loader: Box<dyn RuleLoader>,
        allow_failure: bool,
    ) -> Result<Arc<NameMatcher>> {
        Matcher::create(
            name.into(),
            loader,
            Box::new(move |rules| build_name_db(kind, rules)),
            Arc::new(EmptyDb),
            allow_failure,
        )
        .await
    }
}

impl IpMatcher {
    pub async fn load_ips(
        name: impl Into<String>,
        kind: IpDbKind,
        loader: Box<dyn RuleLoader>,
        allow_failure: bool,
    ) -> Result<Arc<IpMatcher>> {
        Matcher::create(
            name.into(),
            loader,
            Box::new(move |rules| build_ip_db(&kind, rules)),
            Arc::new(EmptyDb),
            allow_failure,
        )
        .await
    }
}

/// TTL for spoofed answers synthesized from hosts-style rules.
const SPOOF_TTL: u32 = 3600;

/// Blocks (or redirects) queries whose name matches the list.
pub struct QueryBlocklist {
    id: String,
    resolver: SharedResolver,
    blocklist: Arc<NameMatcher>,
    allowlist: Option<Arc<NameMatcher>>,
    /// Receives blocked queries instead of answering NXDOMAIN.
    blocklist_resolver: Option<SharedResolver>,
    /// Receives allowlisted queries instead of the regular downstream.
    allowlist_resolver: Option<SharedResolver>,
    blocked: Arc<Counter>,
    allowed: Arc<Counter>,
}

impl QueryBlocklist {
    pub fn new(
        id: impl Into<String>,
        resolver: SharedResolver,
        blocklist: Arc<NameMatcher>,
        allowlist: Option<Arc<NameMatcher>>,
        blocklist_resolver: Option<SharedResolver>,
        allowlist_resolver: Option<SharedResolver>,
    ) -> Self {
        let id = id.into();
        QueryBlocklist {
            blocked: Registry::global().counter(&format!("blocklist.{}.blocked", id)),
            allowed: Registry::global().counter(&format!("blocklist.{}.allowed", id)),
            id,
            resolver,
            blocklist,
            allowlist,
            blocklist_resolver,
            allowlist_resolver,
        }
    }

    /// Answer an A/AAAA/PTR query from the spoof targets of a hosts rule.
    fn spoofed_response(&self, query: &Message, hit: &NameMatch, qtype: RecordType) -> Message {
        let qname = query.queries()[0].name().clone();
        let mut records: Vec<Record> = Vec::new();
        match qtype {
            RecordType::A => {
                for addr in &hit.spoof {
                    if let IpAddr::V4(v4) = addr {
                        records.push(Record::from_rdata(qname.clone(), SPOOF_TTL, RData::A(A(*v4))));
                    }
                }
            }
            RecordType::AAAA => {
                for addr in &hit.spoof {
                    if let IpAddr::V6(v6) = addr {
                        records.push(Record::from_rdata(qname.clone(), SPOOF_TTL, RData::AAAA(AAAA(*v6))));
                    }
                }
            }
            RecordType::PTR => {
                if let Some(target) = &hit.ptr {
                    records.push(Record::from_rdata(
                        qname.clone(),
                        SPOOF_TTL,
                        RData::PTR(PTR(target.clone())),
                    ));
                }
            }
            _ => {}
        }
        if records.is_empty() && hit.spoof.is_empty() && hit.ptr.is_none() {
            return message::nxdomain(query);
        }
        let mut response = message::synthesize(query, ResponseCode::NoError);
        for record in records {
            response.add_answer(record);
        }
        response
    }
}

#[async_trait]
impl Resolver for QueryBlocklist {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(q) = message::first_question(query) else {
            return self.resolver.resolve(query, client).await;
        };
        let qname = q.name().clone();
        let qtype = q.query_type();

        if let Some(allowlist) = &self.allowlist {
            if let Some(hit) = allowlist.db().match_query(&qname, qtype) {
                self.allowed.inc();
                log::debug!("blocklist {}: {} allowed by rule {:?}", self.id, qname, hit.rule);
                let target = self.allowlist_resolver.as_ref().unwrap_or(&self.resolver);
                return target.resolve(query, client).await;
            }
        }

        let Some(hit) = self.blocklist.db().match_query(&qname, qtype) else {
            return self.resolver.resolve(query, client).await;
        };
        self.blocked.inc();
        log::info!(
            "blocklist {}: blocking {} from {} (rule {:?})",
            self.id,
            qname,
            client.source_addr,
            hit.rule
        );
        if let Some(alternative) = &self.blocklist_resolver {
            return alternative.resolve(query, client).await;
        }
        Ok(Some(self.spoofed_response(query, &hit, qtype)))
    }
}

/// Target names carried by an answer record, for response-name matching.
fn record_target(record: &Record) -> Option<&Name> {
    match record.data() {
        RData::CNAME(c) => Some(&c.0),
        RData::NS(ns) => Some(&ns.0),
        RData::PTR(p) => Some(&p.0),
        RData::MX(mx) => Some(mx.exchange()),
        RData::SRV(srv) => Some(srv.target()),
        _ => None,
    }
}

fn record_address(record: &Record) -> Option<IpAddr> {
    match record.data() {
        RData::A(a) => Some(IpAddr::V4(a.0)),
        RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
        _ => None,
    }
}

/// Shared response-side blocking behavior: either strip offending records
/// or replace the whole response.
async fn apply_response_block(
    id: &str,
    query: &Message,
    client: &ClientInfo,
    mut response: Message,
    offending: Vec<usize>,
    filter: bool,
    blocklist_resolver: &Option<SharedResolver>,
    blocked: &Counter,
) -> Result<Option<Message>> {
    if offending.is_empty() {
        return Ok(Some(response));
    }
    blocked.inc();
    if filter {
        let answers: Vec<Record> = response
            .take_answers()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !offending.contains(i))
            .map(|(_, r)| r)
            .collect();
        if answers.is_empty() {
            return Ok(Some(message::nxdomain(query)));
        }
        response.insert_answers(answers);
        return Ok(Some(response));
    }
    if let Some(alternative) = blocklist_resolver {
        return alternative.resolve(query, client).await;
    }
    log::info!("blocklist {}: replacing blocked response for {}", id, client.source_addr);
    Ok(Some(message::nxdomain(query)))
}

/// Blocks responses whose CNAME/MX/NS/PTR/SRV targets match the list.
pub struct ResponseBlocklistName {
    id: String,
    resolver: SharedResolver,
    matcher: Arc<NameMatcher>,
    /// Strip matching records instead of replacing the whole response.
    filter: bool,
    blocklist_resolver: Option<SharedResolver>,
    blocked: Arc<Counter>,
}

impl ResponseBlocklistName {
    pub fn new(
        id: impl Into<String>,
        resolver: SharedResolver,
        matcher: Arc<NameMatcher>,
        filter: bool,
        blocklist_resolver: Option<SharedResolver>,
    ) -> Self {
        let id = id.into();
        ResponseBlocklistName {
            blocked: Registry::global().counter(&format!("blocklist.{}.blocked", id)),
            id,
            resolver,
            matcher,
            filter,
            blocklist_resolver,
        }
    }
}

#[async_trait]
impl Resolver for ResponseBlocklistName {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(response) = self.resolver.resolve(query, client).await? else {
            return Ok(None);
        };
        let db = self.matcher.db();
        let offending: Vec<usize> = response
            .answers()
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                record_target(r)
                    .and_then(|target| db.match_name(target))
                    .map(|hit| {
                        log::info!(
                            "blocklist {}: response target blocked by rule {:?}",
                            self.id,
                            hit.rule
                        );
                        true
                    })
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();
        apply_response_block(
            &self.id,
            query,
            client,
            response,
            offending,
            self.filter,
            &self.blocklist_resolver,
            &self.blocked,
        )
        .await
    }
}

/// Blocks responses carrying A/AAAA records that match an address list,
/// geo database or ASN database.
pub struct ResponseBlocklistIp {
    id: String,
    resolver: SharedResolver,
    matcher: Arc<IpMatcher>,
    filter: bool,
    blocklist_resolver: Option<SharedResolver>,
    blocked: Arc<Counter>,
}

impl ResponseBlocklistIp {
    pub fn new(
        id: impl Into<String>,
        resolver: SharedResolver,
        matcher: Arc<IpMatcher>,
        filter: bool,
        blocklist_resolver: Option<SharedResolver>,
    ) -> Self {
        let id = id.into();
        ResponseBlocklistIp {
            blocked: Registry::global().counter(&format!("blocklist.{}.blocked", id)),
            id,
            resolver,
            matcher,
            filter,
            blocklist_resolver,
        }
    }
}

#[async_trait]
impl Resolver for ResponseBlocklistIp {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(response) = self.resolver.resolve(query, client).await? else {
            return Ok(None);
        };
        let db = self.matcher.db();
        let offending: Vec<usize> = response
            .answers()
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                record_address(r)
                    .and_then(|addr| db.match_ip(addr))
                    .map(|rule| {
                        log::info!("blocklist {}: address blocked by rule {:?}", self.id, rule);
                        true
                    })
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect();
        apply_response_block(
            &self.id,
            query,
            client,
            response,
            offending,
            self.filter,
            &self.blocklist_resolver,
            &self.blocked,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{a_response, client, query, MockResolver};
    use std::str::FromStr;
    use std::sync::Mutex;

    async fn name_matcher(kind: NameDbKind, rules: &[&str]) -> Arc<NameMatcher> {
        NameMatcher::load_names(
            "test",
            kind,
            Box::new(StaticLoader::new(rules.iter().map(|r| r.to_string()).collect())),
            false,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn regex_rule_blocks_with_nxdomain() {
        let upstream = MockResolver::echoing("up");
        let matcher = name_matcher(NameDbKind::Regex, &[r"(^|\.)evil\.test\.$"]).await;
        let blocklist = QueryBlocklist::new("bl", upstream.clone(), matcher, None, None, None);

        let q = query("x.evil.test.", RecordType::A);
        let response = blocklist.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert_eq!(upstream.hits(), 0);

        let ok = query("x.good.test.", RecordType::A);
        blocklist.resolve(&ok, &client()).await.unwrap();
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn allowlist_bypasses_the_blocklist() {
        let upstream = MockResolver::echoing("up");
        let blocked = name_matcher(NameDbKind::Domain, &[".example.com"]).await;
        let allowed = name_matcher(NameDbKind::Domain, &["ok.example.com"]).await;
        let blocklist =
            QueryBlocklist::new("bl", upstream.clone(), blocked, Some(allowed), None, None);

        blocklist
            .resolve(&query("ok.example.com.", RecordType::A), &client())
            .await
            .unwrap();
        assert_eq!(upstream.hits(), 1);

        let response = blocklist
            .resolve(&query("ads.example.com.", RecordType::A), &client())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn hosts_rules_spoof_addresses() {
        let upstream = MockResolver::echoing("up");
        let matcher = name_matcher(NameDbKind::Hosts, &["192.0.2.9 pixel.example.com"]).await;
        let blocklist = QueryBlocklist::new("bl", upstream, matcher, None, None, None);

        let response = blocklist
            .resolve(&query("pixel.example.com.", RecordType::A), &client())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.answers().len(), 1);
        let RData::A(a) = response.answers()[0].data() else {
            panic!("expected A record");
        };
        assert_eq!(a.0.octets(), [192, 0, 2, 9]);
    }

    #[tokio::test]
    async fn blocked_queries_can_route_to_an_alternative() {
        let upstream = MockResolver::echoing("up");
        let alternative = MockResolver::echoing("alt");
        let matcher = name_matcher(NameDbKind::Domain, &[".tracker.test"]).await;
        let blocklist = QueryBlocklist::new(
            "bl",
            upstream.clone(),
            matcher,
            None,
            Some(alternative.clone()),
            None,
        );
        blocklist
            .resolve(&query("x.tracker.test.", RecordType::A), &client())
            .await
            .unwrap();
        assert_eq!(upstream.hits(), 0);
        assert_eq!(alternative.hits(), 1);
    }

    #[tokio::test]
    async fn response_ip_filter_drops_matching_records() {
        let q = query("cdn.example.com.", RecordType::A);
        let mut reply = a_response(&q, [203, 0, 113, 5], 60);
        reply.add_answer(Record::from_rdata(
            q.queries()[0].name().clone(),
            60,
            RData::A(A::new(198, 51, 100, 7)),
        ));
        let upstream = MockResolver::answering("up", reply);
        let matcher = IpMatcher::load_ips(
            "ips",
            IpDbKind::Cidr(PrefixMode::Longest),
            Box::new(StaticLoader::new(vec!["203.0.113.0/24".to_string()])),
            false,
        )
        .await
        .unwrap();
        let blocklist = ResponseBlocklistIp::new("rbl", upstream, matcher, true, None);
        let response = blocklist.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.answers().len(), 1);
        assert_eq!(
            record_address(&response.answers()[0]),
            Some("198.51.100.7".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn response_ip_replace_returns_nxdomain() {
        let q = query("cdn.example.com.", RecordType::A);
        let upstream = MockResolver::answering("up", a_response(&q, [203, 0, 113, 5], 60));
        let matcher = IpMatcher::load_ips(
            "ips",
            IpDbKind::Cidr(PrefixMode::Longest),
            Box::new(StaticLoader::new(vec!["203.0.113.0/24".to_string()])),
            false,
        )
        .await
        .unwrap();
        let blocklist = ResponseBlocklistIp::new("rbl", upstream, matcher, false, None);
        let response = blocklist.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn response_name_matching_follows_cname_targets() {
        use hickory_proto::rr::rdata::CNAME;
        use std::str::FromStr;

        let q = query("alias.example.com.", RecordType::A);
        let mut reply = message::synthesize(&q, ResponseCode::NoError);
        reply.add_answer(Record::from_rdata(
            q.queries()[0].name().clone(),
            60,
            RData::CNAME(CNAME(Name::from_str("bad.tracker.test.").unwrap())),
        ));
        let upstream = MockResolver::answering("up", reply);
        let matcher = name_matcher(NameDbKind::Domain, &[".tracker.test"]).await;
        let blocklist = ResponseBlocklistName::new("rbl", upstream, matcher, false, None);
        let response = blocklist.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }

    /// Loader whose rules can be swapped, for reload testing.
    struct MutableLoader {
        rules: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RuleLoader for MutableLoader {
        async fn load(&self) -> Result<Vec<String>> {
            Ok(self.rules.lock().unwrap().clone())
        }
        fn source(&self) -> String {
            "mutable".to_string()
        }
    }

    #[tokio::test]
    async fn reload_swaps_in_the_new_snapshot() {
        let loader = Arc::new(MutableLoader {
            rules: Mutex::new(vec![".old.test".to_string()]),
        });
        struct Fwd(Arc<MutableLoader>);
        #[async_trait]
        impl RuleLoader for Fwd {
            async fn load(&self) -> Result<Vec<String>> {
                self.0.load().await
            }
            fn source(&self) -> String {
                self.0.source()
            }
        }
        let matcher = NameMatcher::load_names(
            "reload",
            NameDbKind::Domain,
            Box::new(Fwd(Arc::clone(&loader))),
            false,
        )
        .await
        .unwrap();

        let old = Name::from_str("x.old.test.").unwrap();
        let new = Name::from_str("x.new.test.").unwrap();
        assert!(matcher.db().match_name(&old).is_some());
        assert!(matcher.db().match_name(&new).is_none());

        *loader.rules.lock().unwrap() = vec![".new.test".to_string()];
        matcher.reload().await.unwrap();
        assert!(matcher.db().match_name(&old).is_none());
        assert!(matcher.db().match_name(&new).is_some());
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_rules() {
        struct FlakyLoader {
            fail: Mutex<bool>,
        }
        #[async_trait]
        impl RuleLoader for FlakyLoader {
            async fn load(&self) -> Result<Vec<String>> {
                if *self.fail.lock().unwrap() {
                    Err(ResolveError::transport("list source down"))
                } else {
                    Ok(vec![".kept.test".to_string()])
                }
            }
            fn source(&self) -> String {
                "flaky".to_string()
            }
        }
        let loader = Arc::new(FlakyLoader {
            fail: Mutex::new(false),
        });
        struct Fwd(Arc<FlakyLoader>);
        #[async_trait]
        impl RuleLoader for Fwd {
            async fn load(&self) -> Result<Vec<String>> {
                self.0.load().await
            }
            fn source(&self) -> String {
                self.0.source()
            }
        }
        let matcher =
            NameMatcher::load_names("flaky", NameDbKind::Domain, Box::new(Fwd(Arc::clone(&loader))), false)
                .await
                .unwrap();
        *loader.fail.lock().unwrap() = true;
        assert!(matcher.reload().await.is_err());
        assert!(matcher
            .db()
            .match_name(&Name::from_str("a.kept.test.").unwrap())
            .is_some());
    }
}

//! Predicate-ordered query routing.
//!
//! A router holds an ordered list of routes. Each route is a conjunction
//! of optional predicates over the query and its client info; the first
//! route whose predicates all hold dispatches the query to its bound
//! downstream. A query matching no route is an error, which listeners
//! surface as SERVFAIL.

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveTime, Timelike, Weekday};
use hickory_proto::op::Message;
use hickory_proto::rr::{DNSClass, RecordType};
use ipnet::IpNet;
use regex::Regex;

use crate::error::Result;
use crate::message;
use crate::metrics::{LabelMap, Registry};
use crate::{ClientInfo, ResolveError, Resolver, SharedResolver};
use std::sync::Arc;

/// One routing rule. Empty predicate lists match everything, so a route
/// with no predicates is a default route.
pub struct Route {
    /// Matches when the query type is one of these.
    pub types: Vec<RecordType>,
    /// Matches when the query class is one of these.
    pub classes: Vec<DNSClass>,
    /// Matches when the question name matches this expression.
    pub qname: Option<Regex>,
    /// Matches when the client source address lies in one of these nets.
    pub sources: Vec<IpNet>,
    /// Matches when the query arrived on one of these listeners.
    pub listeners: Vec<String>,
    /// Matches on these weekdays (local time).
    pub weekdays: Vec<Weekday>,
    /// Matches inside this local time-of-day window, `start <= t < end`.
    pub window: Option<(NaiveTime, NaiveTime)>,
    /// Invert the overall match result.
    pub invert: bool,
    /// Downstream receiving matching queries.
    pub resolver: SharedResolver,
}

impl Route {
    /// A route with no predicates: matches every query.
    pub fn to(resolver: SharedResolver) -> Self {
        Route {
            types: Vec::new(),
            classes: Vec::new(),
            qname: None,
            sources: Vec::new(),
            listeners: Vec::new(),
            weekdays: Vec::new(),
            window: None,
            invert: false,
            resolver,
        }
    }

    fn matches(&self, query: &Message, client: &ClientInfo) -> bool {
        let matched = self.matches_inner(query, client);
        if self.invert {
            !matched
        } else {
            matched
        }
    }

    fn matches_inner(&self, query: &Message, client: &ClientInfo) -> bool {
        let question = message::first_question(query);
        if !self.types.is_empty() {
            match question {
                Some(q) if self.types.contains(&q.query_type()) => {}
                _ => return false,
            }
        }
        if !self.classes.is_empty() {
            match question {
                Some(q) if self.classes.contains(&q.query_class()) => {}
                _ => return false,
            }
        }
        if let Some(expr) = &self.qname {
            match question {
                Some(q) if expr.is_match(&q.name().to_lowercase().to_string()) => {}
                _ => return false,
            }
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|net| net.contains(&client.source_addr.ip())) {
            return false;
        }
        if !self.listeners.is_empty() && !self.listeners.iter().any(|l| l.as_str() == &*client.listener) {
            return false;
        }
        if !self.weekdays.is_empty() || self.window.is_some() {
            let now = Local::now();
            if !self.weekdays.is_empty() && !self.weekdays.contains(&now.weekday()) {
                return false;
            }
            if let Some((start, end)) = self.window {
                let t = NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second())
                    .expect("wall clock is a valid time");
                if t < start || t >= end {
                    return false;
                }
            }
        }
        true
    }
}

pub struct Router {
    id: String,
    routes: Vec<Route>,
    dispatched: Arc<LabelMap>,
    failures: Arc<crate::metrics::Counter>,
}

impl Router {
    pub fn new(id: impl Into<String>, routes: Vec<Route>) -> Self {
        let id = id.into();
        Router {
            dispatched: Registry::global().label_map(&format!("router.{}.route", id)),
            failures: Registry::global().counter(&format!("router.{}.failure", id)),
            id,
            routes,
        }
    }
}

#[async_trait]
impl Resolver for Router {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        for route in &self.routes {
            if route.matches(query, client) {
                self.dispatched.inc(route.resolver.id());
                return route.resolver.resolve(query, client).await;
            }
        }
        self.failures.inc();
        Err(ResolveError::NoRoute(format!(
            "router {}: no route for {}",
            self.id,
            message::first_question(query)
                .map(|q| q.name().to_string())
                .unwrap_or_else(|| "<no question>".to_string())
        )))
    }
}

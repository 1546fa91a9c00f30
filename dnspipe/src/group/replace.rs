//! Query-name rewriting.
//!
//! Applies an ordered list of regular-expression replacements to the
//! question name before forwarding, then restores the original name on
//! the question and on matching answer owner names of the response. A
//! pure transformer; the single downstream does the resolving.

use std::str::FromStr;

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::Name;
use regex::Regex;

use crate::error::Result;
use crate::message;
use crate::{ClientInfo, ResolveError, Resolver, SharedResolver};

pub struct ReplacePattern {
    pub from: Regex,
    pub to: String,
}

impl ReplacePattern {
    pub fn new(from: &str, to: impl Into<String>) -> Result<Self> {
        Ok(ReplacePattern {
            from: Regex::new(from)?,
            to: to.into(),
        })
    }
}

pub struct Replace {
    id: String,
    resolver: SharedResolver,
    patterns: Vec<ReplacePattern>,
}

impl Replace {
    pub fn new(id: impl Into<String>, resolver: SharedResolver, patterns: Vec<ReplacePattern>) -> Self {
        Replace {
            id: id.into(),
            resolver,
            patterns,
        }
    }

    fn rewrite(&self, name: &str) -> String {
        let mut current = name.to_string();
        for pattern in &self.patterns {
            current = pattern.from.replace(&current, pattern.to.as_str()).into_owned();
        }
        current
    }
}

#[async_trait]
impl Resolver for Replace {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, client: &ClientInfo) -> Result<Option<Message>> {
        let Some(q) = message::first_question(query) else {
            return self.resolver.resolve(query, client).await;
        };
        let original_name = q.name().clone();
        let rewritten = self.rewrite(&original_name.to_string());
        if rewritten == original_name.to_string() {
            return self.resolver.resolve(query, client).await;
        }
        let new_name = Name::from_str(&rewritten).map_err(|e| {
            ResolveError::protocol(format!("rewritten name {:?} is invalid: {}", rewritten, e))
        })?;

        let mut outgoing = query.clone();
        {
            let mut queries: Vec<_> = outgoing.take_queries();
            queries[0].set_name(new_name.clone());
            outgoing.add_queries(queries);
        }

        let Some(mut response) = self.resolver.resolve(&outgoing, client).await? else {
            return Ok(None);
        };

        // Undo the rewrite so the caller sees the name it asked for.
        let mut queries: Vec<_> = response.take_queries();
        if let Some(first) = queries.first_mut() {
            if first.name() == &new_name {
                first.set_name(original_name.clone());
            }
        }
        response.add_queries(queries);
        let mut answers = response.take_answers();
        for record in answers.iter_mut() {
            if record.name() == &new_name {
                record.set_name(original_name.clone());
            }
        }
        response.insert_answers(answers);
        Ok(Some(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{client, query, MockResolver};
    use hickory_proto::rr::RecordType;
    use std::sync::Mutex;

    /// Records the question it saw and answers with one A record owned by
    /// that question's name.
    struct Capture {
        seen: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Resolver for Capture {
        fn id(&self) -> &str {
            "capture"
        }

        async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
            let name = query.queries()[0].name().to_string();
            *self.seen.lock().unwrap() = Some(name);
            Ok(Some(crate::test_util::a_response(query, [1, 2, 3, 4], 60)))
        }
    }

    #[tokio::test]
    async fn rewrites_forward_and_restores_back() {
        let capture = std::sync::Arc::new(Capture {
            seen: Mutex::new(None),
        });
        let replace = Replace::new(
            "replace",
            capture.clone(),
            vec![ReplacePattern::new(r"^dns\.", "dns-internal.").unwrap()],
        );
        let q = query("dns.example.com.", RecordType::A);
        let response = replace.resolve(&q, &client()).await.unwrap().unwrap();

        assert_eq!(
            capture.seen.lock().unwrap().as_deref(),
            Some("dns-internal.example.com.")
        );
        assert_eq!(response.queries()[0].name(), q.queries()[0].name());
        assert_eq!(response.answers()[0].name(), q.queries()[0].name());
    }

    #[tokio::test]
    async fn non_matching_names_pass_through() {
        let upstream = MockResolver::echoing("up");
        let replace = Replace::new(
            "replace",
            upstream,
            vec![ReplacePattern::new(r"^dns\.", "dns-internal.").unwrap()],
        );
        let q = query("web.example.com.", RecordType::A);
        let response = replace.resolve(&q, &client()).await.unwrap().unwrap();
        assert_eq!(response.queries()[0].name(), q.queries()[0].name());
    }
}

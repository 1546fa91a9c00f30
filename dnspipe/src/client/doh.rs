//! DoH upstream client.
//!
//! Not pipelined: HTTP/2 multiplexes requests natively, so every query is
//! its own request on a shared `reqwest` client. Queries go out with id 0
//! (friendlier to HTTP caches); the original id is restored on the way
//! back.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_URL_SAFE_NO_PAD};
use hickory_proto::op::Message;

use super::REQUEST_TIMEOUT;
use crate::error::Result;
use crate::message;
use crate::metrics::{Counter, Registry};
use crate::{ClientInfo, ResolveError, Resolver};

const CONTENT_TYPE: &str = "application/dns-message";

/// HTTP method used for the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DohMethod {
    #[default]
    Post,
    Get,
}

pub struct DohClient {
    id: String,
    url: String,
    method: DohMethod,
    client: reqwest::Client,
    queries: Arc<Counter>,
    failures: Arc<Counter>,
}

impl DohClient {
    /// `bootstrap` pins the URL's hostname to a pre-resolved address so the
    /// client never needs another resolver to reach its own upstream.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        method: DohMethod,
        bootstrap: Option<SocketAddr>,
        ca_pem: Option<&[u8]>,
    ) -> Result<Self> {
        let id = id.into();
        let url = url.into();
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(addr) = bootstrap {
            let host = reqwest::Url::parse(&url)
                .map_err(|e| ResolveError::config(format!("invalid DoH url {}: {}", url, e)))?
                .host_str()
                .ok_or_else(|| ResolveError::config(format!("DoH url {} has no host", url)))?
                .to_string();
            builder = builder.resolve(&host, addr);
        }
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ResolveError::config(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| ResolveError::config(format!("http client: {}", e)))?;
        let queries = Registry::global().counter(&format!("client.{}.query", id));
        let failures = Registry::global().counter(&format!("client.{}.failure", id));
        Ok(DohClient {
            id,
            url,
            method,
            client,
            queries,
            failures,
        })
    }

    async fn exchange(&self, query: &Message) -> Result<Message> {
        let mut outgoing = query.clone();
        outgoing.set_id(0);
        let wire = outgoing.to_vec()?;

        let request = match self.method {
            DohMethod::Post => self
                .client
                .post(&self.url)
                .header("Content-Type", CONTENT_TYPE)
                .header("Accept", CONTENT_TYPE)
                .body(wire),
            DohMethod::Get => {
                let encoded = BASE64_URL_SAFE_NO_PAD.encode(&wire);
                self.client
                    .get(&self.url)
                    .query(&[("dns", encoded.as_str())])
                    .header("Accept", CONTENT_TYPE)
            }
        };
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ResolveError::transport(format!(
                "DoH upstream returned {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;
        let mut answer = Message::from_vec(&body)?;
        answer.set_id(query.id());
        if !message::questions_match(query, &answer) {
            return Err(ResolveError::protocol("response question does not match query"));
        }
        Ok(answer)
    }
}

#[async_trait]
impl Resolver for DohClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, query: &Message, _client: &ClientInfo) -> Result<Option<Message>> {
        self.queries.inc();
        match self.exchange(query).await {
            Ok(msg) => Ok(Some(msg)),
            Err(err) => {
                self.failures.inc();
                Err(err)
            }
        }
    }
}

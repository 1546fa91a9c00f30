//! Error types shared by every element of the query pipeline.
//!
//! Errors are grouped by where they occur rather than by crate of origin:
//! transport failures bubble up from upstream clients, timeouts from the
//! per-request deadline, protocol errors from response validation, policy
//! errors from access control, and configuration errors only ever at
//! load/build time. Groups translate transport/timeout errors into retries
//! or SERVFAIL; listeners translate anything uncaught into SERVFAIL.

/// Result alias using the crate's `ResolveError` as the error type.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Unified error type for resolver, client and listener failures.
#[derive(Debug)]
pub enum ResolveError {
    /// Connect/read/write/TLS failure or a DNS wire parse failure.
    Transport(String),
    /// The per-request deadline expired before a response arrived.
    Timeout(String),
    /// The response was malformed with respect to the query, e.g. the
    /// question section did not match.
    Protocol(String),
    /// The query was rejected by policy (source outside `allowed_nets`,
    /// rate limit exceeded).
    Policy(String),
    /// No route predicate matched the query.
    NoRoute(String),
    /// Malformed rules, unresolvable references or other construction-time
    /// failures. Never produced on the query path.
    Config(String),
}

impl ResolveError {
    pub fn transport(msg: impl Into<String>) -> Self {
        ResolveError::Transport(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ResolveError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ResolveError::Protocol(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        ResolveError::Policy(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ResolveError::Config(msg.into())
    }

    /// True for errors a failover group should treat as a failed attempt.
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            ResolveError::Transport(_) | ResolveError::Timeout(_) | ResolveError::Protocol(_)
        )
    }
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Transport(msg) => write!(f, "transport error: {}", msg),
            ResolveError::Timeout(msg) => write!(f, "query timeout: {}", msg),
            ResolveError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ResolveError::Policy(msg) => write!(f, "policy: {}", msg),
            ResolveError::NoRoute(msg) => write!(f, "no route: {}", msg),
            ResolveError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Transport(err.to_string())
    }
}

impl From<hickory_proto::ProtoError> for ResolveError {
    fn from(err: hickory_proto::ProtoError) -> Self {
        ResolveError::Transport(format!("dns wire: {}", err))
    }
}

impl From<rustls::Error> for ResolveError {
    fn from(err: rustls::Error) -> Self {
        ResolveError::Transport(format!("tls: {}", err))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResolveError::Timeout(err.to_string())
        } else {
            ResolveError::Transport(err.to_string())
        }
    }
}

impl From<quinn::ConnectionError> for ResolveError {
    fn from(err: quinn::ConnectionError) -> Self {
        ResolveError::Transport(format!("quic: {}", err))
    }
}

impl From<regex::Error> for ResolveError {
    fn from(err: regex::Error) -> Self {
        ResolveError::Config(format!("invalid regular expression: {}", err))
    }
}

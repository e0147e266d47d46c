//! ## Error Module
//!
//! Defines [`ProxyError`], the error type shared by every component of the proxy, and the
//! [`ProxyResult`] alias.
//!
//! The first group of variants is the share/work taxonomy that listeners translate into
//! miner-facing responses. The rest wraps failures from I/O, parsing and configuration.
use std::{fmt, sync::PoisonError};

use v1::json_rpc::{error_codes, JsonRpcError};

pub type ProxyResult<T> = core::result::Result<T, ProxyError>;

#[derive(Debug)]
pub enum ProxyError {
    /// Work requested before a job arrived, or the last job went stale after losing the pool.
    NoJob,
    /// Submission references a job that is no longer current or in history.
    StaleJob,
    /// The same (job, extranonce2, ntime, nonce) was already validated.
    DuplicateShare,
    /// Worker is not authorized on the current pool session.
    Unauthorized,
    /// The pool session is not subscribed, or dropped while the request was in flight.
    UpstreamUnavailable,
    /// Extranonce2 does not match the width the session hands out.
    InvalidExtranonce2Size { expected: usize, actual: usize },
    /// A submitted header could not be decoded.
    MalformedSubmission(String),
    /// The merkle root in a submitted header differs from the one rebuilt from the job.
    MerkleMismatch,
    /// No extranonce prefix left for another push miner.
    ExtranonceSpaceExhausted,
    /// The pool answered a request with an error.
    PoolRejected(JsonRpcError),
    /// Errors on bad CLI argument input.
    BadCliArgs,
    /// Errors from the `config` crate.
    BadConfig(ext_config::ConfigError),
    /// A configuration value that parses but cannot be used.
    InvalidConfig(String),
    /// Errors on bad `serde_json` serialize/deserialize.
    BadSerdeJson(serde_json::Error),
    /// Sv1 protocol library error
    V1Protocol(v1::error::Error),
    /// Sv1 method could not be built from a json-rpc message.
    V1Method(v1::methods::MethodError),
    /// Errors on bad `TcpStream` connection.
    Io(std::io::Error),
    /// Errors from the HTTP client used for autodetection.
    HttpClient(hyper_util::client::legacy::Error),
    /// Upstream address could not be resolved.
    Resolve(String),
    /// Nothing was received from the pool for too long.
    UpstreamTimeout,
    /// The pool connection closed.
    ConnectionClosed,
    PoisonLock,
}

impl ProxyError {
    /// Maps the error to the Stratum error a push miner receives.
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        match self {
            ProxyError::StaleJob => JsonRpcError::new(error_codes::JOB_NOT_FOUND, "Job not found"),
            ProxyError::DuplicateShare => {
                JsonRpcError::new(error_codes::DUPLICATE_SHARE, "Duplicate share")
            }
            ProxyError::Unauthorized => {
                JsonRpcError::new(error_codes::UNAUTHORIZED, "Unauthorized worker")
            }
            ProxyError::UpstreamUnavailable | ProxyError::NoJob => {
                JsonRpcError::new(error_codes::NOT_SUBSCRIBED, "Upstream unavailable")
            }
            ProxyError::PoolRejected(e) => e.clone(),
            other => JsonRpcError::new(error_codes::OTHER, other.to_string()),
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ProxyError::*;
        match self {
            NoJob => write!(f, "No job available"),
            StaleJob => write!(f, "Stale job"),
            DuplicateShare => write!(f, "Duplicate share"),
            Unauthorized => write!(f, "Unauthorized worker"),
            UpstreamUnavailable => write!(f, "Upstream unavailable"),
            InvalidExtranonce2Size { expected, actual } => write!(
                f,
                "Invalid extranonce2 size: expected {expected} bytes, got {actual}"
            ),
            MalformedSubmission(ref e) => write!(f, "Malformed submission: {e}"),
            MerkleMismatch => write!(f, "Merkle root does not match the job"),
            ExtranonceSpaceExhausted => write!(f, "No extranonce space left"),
            PoolRejected(ref e) => write!(f, "Pool rejected request: {e}"),
            BadCliArgs => write!(f, "Bad CLI arg input"),
            BadConfig(ref e) => write!(f, "Config error: `{e:?}`"),
            InvalidConfig(ref e) => write!(f, "Invalid config: {e}"),
            BadSerdeJson(ref e) => write!(f, "Bad serde json: `{e:?}`"),
            V1Protocol(ref e) => write!(f, "V1 Protocol Error: `{e}`"),
            V1Method(ref e) => write!(f, "V1 Method Error: `{e:?}`"),
            Io(ref e) => write!(f, "I/O error: `{e:?}`"),
            HttpClient(ref e) => write!(f, "HTTP client error: `{e:?}`"),
            Resolve(ref e) => write!(f, "Cannot resolve upstream address: {e}"),
            UpstreamTimeout => write!(f, "Upstream inactivity timeout"),
            ConnectionClosed => write!(f, "Connection closed"),
            PoisonLock => write!(f, "Poison Lock error"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<ext_config::ConfigError> for ProxyError {
    fn from(e: ext_config::ConfigError) -> Self {
        ProxyError::BadConfig(e)
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::BadSerdeJson(e)
    }
}

impl From<v1::error::Error> for ProxyError {
    fn from(e: v1::error::Error) -> Self {
        ProxyError::V1Protocol(e)
    }
}

impl From<v1::methods::MethodError> for ProxyError {
    fn from(e: v1::methods::MethodError) -> Self {
        ProxyError::V1Method(e)
    }
}

impl From<v1::methods::ParsingMethodError> for ProxyError {
    fn from(e: v1::methods::ParsingMethodError) -> Self {
        ProxyError::V1Method(v1::methods::MethodError::ParsingMethodError(e))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(e)
    }
}

impl From<hyper_util::client::legacy::Error> for ProxyError {
    fn from(e: hyper_util::client::legacy::Error) -> Self {
        ProxyError::HttpClient(e)
    }
}

impl<T> From<PoisonError<T>> for ProxyError {
    fn from(_e: PoisonError<T>) -> Self {
        ProxyError::PoisonLock
    }
}

impl From<tokio::time::error::Elapsed> for ProxyError {
    fn from(_e: tokio::time::error::Elapsed) -> Self {
        ProxyError::UpstreamTimeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_errors_map_to_stratum_codes() {
        assert_eq!(ProxyError::StaleJob.to_json_rpc_error().code, 21);
        assert_eq!(ProxyError::DuplicateShare.to_json_rpc_error().code, 22);
        assert_eq!(ProxyError::Unauthorized.to_json_rpc_error().code, 24);
        assert_eq!(ProxyError::UpstreamUnavailable.to_json_rpc_error().code, 25);
        let other = ProxyError::MerkleMismatch.to_json_rpc_error();
        assert_eq!(other.code, 20);
        assert_eq!(other.message, "Merkle root does not match the job");
        let pool = JsonRpcError::new(error_codes::LOW_DIFFICULTY, "Low difficulty share");
        assert_eq!(ProxyError::PoolRejected(pool.clone()).to_json_rpc_error(), pool);
    }
}

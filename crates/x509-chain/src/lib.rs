//! Owned X.509 certificates, chain verification against a trust-framework
//! root, and signer identity extraction.
//!
//! The trust framework signs with EC P-256 keys and ECDSA-SHA256; other
//! algorithms are rejected rather than silently accepted.

mod cert;
pub use cert::*;
mod identity;
pub use identity::*;

use thiserror::Error;

// re-exports
pub use x509_parser;

/// Errors raised while parsing certificates or walking a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("pem: {0}")]
    Pem(String),
    #[error("der: {0}")]
    Der(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("certificate {subject} was not issued by {issuer}")]
    IssuerMismatch { subject: String, issuer: String },
    #[error("certificate {serial} is not valid at timestamp {timestamp}")]
    NotValidAt { serial: String, timestamp: i64 },
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("certificate chain is empty")]
    EmptyChain,
    #[error("identity: {0}")]
    Identity(String),
    #[error("invalid timestamp: {0}")]
    Time(i64),
}

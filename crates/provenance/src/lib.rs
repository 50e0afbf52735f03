//! Provenance records for a federated trust framework.
//!
//! A record is a signed, append-only audit trail describing how a piece of
//! data was originated, permissioned, transferred, received, and processed by
//! cooperating members. Each participant appends steps to a
//! [`RecordBuilder`], seals them with a [`Signer`], and passes the resulting
//! [`SealedRecord`] on; the next participant verifies it against the
//! trust-framework root through a [`CertificateProvider`], extends it, and
//! signs again. Verification yields a flat, ordered step list in which every
//! step carries the identity of the member that sealed it and of every member
//! that later wrapped it.
//!
//! The record is not a blockchain and not a confidentiality mechanism: there
//! is no global ordering or consensus, and step payloads are encoded but not
//! encrypted.

mod canonical;
pub use canonical::*;
mod certificates;
pub use certificates::*;
mod container;
pub use container::*;
mod error;
pub use error::*;
mod record;
pub use record::*;
mod signing;
pub use signing::*;
mod step;

// re-exports
pub use x509_chain;
pub use x509_chain::{CertChain, Certificate, ChainError, SignerInfo};

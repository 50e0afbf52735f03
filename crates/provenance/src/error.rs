use thiserror::Error;

/// Errors raised by record construction, signing, and verification.
///
/// Every error is fatal for the operation in flight; nothing is retried
/// inside the core. A failed `verify` leaves the record unverified.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Wire record, container, or signature block has the wrong shape.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    /// Container format version is not recognised.
    #[error("cannot decode container format version {0}")]
    UnknownVersion(u64),
    /// Certificate serial is not a canonical decimal string.
    #[error("bad certificate serial number in record: {0}")]
    BadSerial(String),
    /// The provider cannot resolve a serial to a certificate.
    #[error("certificate not found: {0}")]
    CertificateNotFound(String),
    /// Two records carry different certificate paths for the same serial.
    #[error("conflicting certificate paths for serial {0}")]
    CertificateConflict(String),
    /// The chain does not terminate at the trust root, or was not valid at
    /// the signing timestamp.
    #[error("certificate chain invalid: {0}")]
    ChainInvalid(String),
    /// ECDSA verification failed over the reconstructed data-to-sign.
    #[error("signature verification failed")]
    SignatureInvalid,
    /// `add_step` received a step with a reserved key or missing type.
    #[error("invalid step: {0}")]
    StepShape(String),
    /// The operation needs a verified record.
    #[error("record is not verified, call verify() first")]
    NotVerified,
    /// `find_step` matched nothing.
    #[error("no step matched the pattern")]
    StepNotFound,
    /// The signer could not produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
}

//! Certificate providers: resolve a signing certificate chain for a serial
//! and verify a container signature against the trust-framework root.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use tracing::debug;
use x509_chain::{CertChain, Certificate, ChainError, SignerInfo};

use crate::error::RecordError;
use crate::step::is_canonical_serial;

/// Certificate paths carried inside a record, keyed by decimal serial.
///
/// A path is `[PEM, issuerSerial…]`: the certificate itself followed by
/// serial references to the map entries holding its issuer chain, so shared
/// intermediates are stored once.
pub type CertificateMap = BTreeMap<String, Vec<String>>;

/// Resolves signing certificates and verifies container signatures.
///
/// Providers are read-only after construction and may be shared across
/// records. Each environment has its own signing root CA.
pub trait CertificateProvider: Send + Sync {
    /// Whether records sealed under this provider should embed the signer's
    /// certificate chain.
    fn policy_include_certificates_in_record(&self) -> bool;

    /// Verifies `signature` over `data` for the certificate with `serial`.
    ///
    /// The chain is validated as of `sign_timestamp`, not the wall clock:
    /// historical records must remain verifiable after leaf certificates
    /// expire, provided they were valid when signed.
    fn verify(
        &self,
        certificates_from_record: &CertificateMap,
        serial: &str,
        sign_timestamp: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<SignerInfo, RecordError>;
}

/// Provider for self-contained records: certificate chains travel inside the
/// record and are embedded at sign time. Portable without a directory, at the
/// cost of record size.
pub struct SelfContainedProvider {
    root: Certificate,
}

impl SelfContainedProvider {
    pub fn new(root_ca_pem: &str) -> Result<Self, RecordError> {
        Ok(Self { root: Certificate::from_pem(root_ca_pem).map_err(chain_invalid)? })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let pem = fs::read_to_string(&path).map_err(|err| {
            RecordError::CertificateNotFound(format!("{}: {err}", path.as_ref().display()))
        })?;
        Self::new(&pem)
    }
}

impl CertificateProvider for SelfContainedProvider {
    fn policy_include_certificates_in_record(&self) -> bool {
        true
    }

    fn verify(
        &self,
        certificates_from_record: &CertificateMap,
        serial: &str,
        sign_timestamp: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<SignerInfo, RecordError> {
        if !is_canonical_serial(serial) {
            return Err(RecordError::BadSerial(serial.into()));
        }
        let certs = resolve_from_record(certificates_from_record, serial)?;
        verify_with_chain(&self.root, certs, serial, sign_timestamp, data, signature)
    }
}

/// Provider backed by a local directory of `<serial>-bundle.pem` files, each
/// holding the signing certificate first and its issuer chain after it.
/// Records verified through it stay small; chains are resolved out-of-band.
pub struct DirectoryProvider {
    root: Certificate,
    directory: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root_ca_pem: &str, directory: impl Into<PathBuf>) -> Result<Self, RecordError> {
        Ok(Self {
            root: Certificate::from_pem(root_ca_pem).map_err(chain_invalid)?,
            directory: directory.into(),
        })
    }

    pub fn from_file(
        root_ca_path: impl AsRef<Path>,
        directory: impl Into<PathBuf>,
    ) -> Result<Self, RecordError> {
        let pem = fs::read_to_string(&root_ca_path).map_err(|err| {
            RecordError::CertificateNotFound(format!("{}: {err}", root_ca_path.as_ref().display()))
        })?;
        Self::new(&pem, directory)
    }
}

impl CertificateProvider for DirectoryProvider {
    fn policy_include_certificates_in_record(&self) -> bool {
        false
    }

    fn verify(
        &self,
        certificates_from_record: &CertificateMap,
        serial: &str,
        sign_timestamp: &str,
        data: &[u8],
        signature: &[u8],
    ) -> Result<SignerInfo, RecordError> {
        if !is_canonical_serial(serial) {
            return Err(RecordError::BadSerial(serial.into()));
        }
        // Certificates travelling in the record take precedence; the local
        // store is the fallback.
        let certs = if certificates_from_record.contains_key(serial) {
            resolve_from_record(certificates_from_record, serial)?
        } else {
            let path = self.directory.join(format!("{serial}-bundle.pem"));
            let pem = fs::read_to_string(&path)
                .map_err(|_| RecordError::CertificateNotFound(format!("serial {serial}")))?;
            Certificate::list_from_pem(&pem).map_err(chain_invalid)?
        };
        verify_with_chain(&self.root, certs, serial, sign_timestamp, data, signature)
    }
}

/// Materialises a full chain (leaf first) from the compressed in-record map.
fn resolve_from_record(
    map: &CertificateMap,
    serial: &str,
) -> Result<Vec<Certificate>, RecordError> {
    let mut chain = Vec::new();
    let mut visited = BTreeSet::new();
    resolve_path(map, serial, &mut chain, &mut visited)?;
    Ok(chain)
}

fn resolve_path(
    map: &CertificateMap,
    serial: &str,
    chain: &mut Vec<Certificate>,
    visited: &mut BTreeSet<String>,
) -> Result<(), RecordError> {
    if !visited.insert(serial.to_string()) {
        return Err(RecordError::MalformedRecord(format!(
            "certificate path cycle at serial {serial}"
        )));
    }
    let path = map
        .get(serial)
        .ok_or_else(|| RecordError::CertificateNotFound(format!("serial {serial}")))?;
    let (pem, issuer_serials) = path.split_first().ok_or_else(|| {
        RecordError::MalformedRecord(format!("empty certificate path for serial {serial}"))
    })?;
    chain.push(Certificate::from_pem(pem).map_err(|err| {
        RecordError::MalformedRecord(format!("certificate for serial {serial}: {err}"))
    })?);
    for issuer in issuer_serials {
        resolve_path(map, issuer, chain, visited)?;
    }
    Ok(())
}

fn verify_with_chain(
    root: &Certificate,
    certs: Vec<Certificate>,
    serial: &str,
    sign_timestamp: &str,
    data: &[u8],
    signature: &[u8],
) -> Result<SignerInfo, RecordError> {
    let chain = CertChain::new(certs).map_err(chain_invalid)?;
    if chain.leaf().serial() != serial {
        return Err(RecordError::ChainInvalid(format!(
            "resolved certificate has serial {}, record names {serial}",
            chain.leaf().serial()
        )));
    }
    let at = DateTime::parse_from_rfc3339(sign_timestamp)
        .map_err(|_| {
            RecordError::MalformedRecord(format!("bad sign timestamp {sign_timestamp:?}"))
        })?
        .timestamp();
    chain.verify_at(root, at).map_err(chain_invalid)?;
    debug!(serial = %serial, certs = chain.certs().len(), "chain valid at signing time");
    match chain.leaf().verify_signature(data, signature) {
        Ok(()) => {}
        Err(ChainError::SignatureInvalid) => return Err(RecordError::SignatureInvalid),
        Err(err) => return Err(chain_invalid(err)),
    }
    SignerInfo::from_certificate(chain.leaf()).map_err(chain_invalid)
}

fn chain_invalid(err: ChainError) -> RecordError {
    RecordError::ChainInvalid(err.to_string())
}

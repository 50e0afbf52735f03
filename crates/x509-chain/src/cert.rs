use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use x509_parser::oid_registry::{
    OID_EC_P256, OID_KEY_TYPE_EC_PUBLIC_KEY, OID_SIG_ECDSA_WITH_SHA256,
};
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

use crate::ChainError;

/// An owned X.509 certificate.
///
/// Certificates travel inside records and across provider boundaries, so this
/// wrapper owns its DER bytes and parses on demand. The decimal serial is
/// extracted once at construction; serials overflow 64-bit integers and are
/// always handled as strings.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    serial: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate").field("serial", &self.serial).finish()
    }
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> Result<Self, ChainError> {
        let serial = parse_certificate(&der)?.tbs_certificate.serial.to_str_radix(10);
        Ok(Self { der, serial })
    }

    /// Parses the first CERTIFICATE block of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, ChainError> {
        Ok(Self::list_from_pem(pem)?.remove(0))
    }

    /// Parses every CERTIFICATE block of a PEM document, in order.
    pub fn list_from_pem(pem: &str) -> Result<Vec<Self>, ChainError> {
        let mut certs = Vec::new();
        for block in Pem::iter_from_buffer(pem.as_bytes()) {
            let block = block.map_err(|err| ChainError::Pem(err.to_string()))?;
            if block.label != "CERTIFICATE" {
                continue;
            }
            certs.push(Self::from_der(block.contents)?);
        }
        if certs.is_empty() {
            return Err(ChainError::Pem("no CERTIFICATE blocks found".into()));
        }
        Ok(certs)
    }

    pub fn to_pem(&self) -> String {
        let encoded = STANDARD.encode(&self.der);
        let mut pem = String::with_capacity(encoded.len() + 64);
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        let mut offset = 0;
        while offset < encoded.len() {
            let end = usize::min(offset + 64, encoded.len());
            pem.push_str(&encoded[offset..end]);
            pem.push('\n');
            offset = end;
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Decimal serial number of this certificate.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Verifies that this certificate was signed by `issuer`.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<(), ChainError> {
        let cert = self.parse()?;
        let issuer_cert = issuer.parse()?;
        if cert.issuer().as_raw() != issuer_cert.subject().as_raw() {
            return Err(ChainError::IssuerMismatch {
                subject: self.serial.clone(),
                issuer: issuer.serial.clone(),
            });
        }
        if cert.signature_algorithm.oid() != &OID_SIG_ECDSA_WITH_SHA256 {
            return Err(ChainError::UnsupportedAlgorithm(
                cert.signature_algorithm.oid().to_id_string(),
            ));
        }
        let key = verifying_key(&issuer_cert)?;
        let signature = Signature::from_der(cert.signature_value.as_ref())
            .map_err(|_| ChainError::SignatureInvalid)?;
        key.verify(cert.tbs_certificate.as_ref(), &signature)
            .map_err(|_| ChainError::SignatureInvalid)
    }

    /// Verifies an ECDSA-SHA256 signature over `data` with this certificate's
    /// public key. `signature` is DER encoded.
    pub fn verify_signature(&self, data: &[u8], signature: &[u8]) -> Result<(), ChainError> {
        let key = verifying_key(&self.parse()?)?;
        let signature = Signature::from_der(signature).map_err(|_| ChainError::SignatureInvalid)?;
        key.verify(data, &signature).map_err(|_| ChainError::SignatureInvalid)
    }

    pub(crate) fn parse(&self) -> Result<X509Certificate<'_>, ChainError> {
        parse_certificate(&self.der)
    }
}

fn parse_certificate(der: &[u8]) -> Result<X509Certificate<'_>, ChainError> {
    let (remaining, cert) =
        X509Certificate::from_der(der).map_err(|err| ChainError::Der(format!("{err:?}")))?;
    if !remaining.is_empty() {
        return Err(ChainError::Der("trailing bytes after certificate".into()));
    }
    Ok(cert)
}

fn verifying_key(cert: &X509Certificate<'_>) -> Result<VerifyingKey, ChainError> {
    let spki = cert.public_key();
    if spki.algorithm.algorithm != OID_KEY_TYPE_EC_PUBLIC_KEY {
        return Err(ChainError::UnsupportedAlgorithm(
            spki.algorithm.algorithm.to_id_string(),
        ));
    }
    let curve = spki
        .algorithm
        .parameters
        .as_ref()
        .and_then(|params| params.as_oid().ok())
        .ok_or_else(|| ChainError::UnsupportedAlgorithm("missing EC curve parameters".into()))?;
    if curve != OID_EC_P256 {
        return Err(ChainError::UnsupportedAlgorithm(curve.to_id_string()));
    }
    VerifyingKey::from_sec1_bytes(spki.subject_public_key.as_ref())
        .map_err(|_| ChainError::Der("invalid EC public key".into()))
}

/// A certificate chain ordered leaf first, root-most issuer last.
///
/// This matches the order certificates appear in `<serial>-bundle.pem` files
/// and in the compressed certificate paths carried inside records.
#[derive(Debug, Clone)]
pub struct CertChain {
    certs: Vec<Certificate>,
}

impl CertChain {
    pub fn new(certs: Vec<Certificate>) -> Result<Self, ChainError> {
        if certs.is_empty() {
            return Err(ChainError::EmptyChain);
        }
        Ok(Self { certs })
    }

    pub fn from_pem_bundle(pem: &str) -> Result<Self, ChainError> {
        Self::new(Certificate::list_from_pem(pem)?)
    }

    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    /// Checks that every certificate (the trust root included) is valid at
    /// `timestamp` and that the issuer links run unbroken up to `root`.
    ///
    /// `timestamp` is the signing time, not the verification time: a chain
    /// whose leaf has since expired still verifies if it was valid when the
    /// signature was made.
    pub fn verify_at(&self, root: &Certificate, timestamp: i64) -> Result<(), ChainError> {
        let time =
            ASN1Time::from_timestamp(timestamp).map_err(|_| ChainError::Time(timestamp))?;
        for cert in self.certs.iter().chain(std::iter::once(root)) {
            if !cert.parse()?.validity().is_valid_at(time) {
                return Err(ChainError::NotValidAt {
                    serial: cert.serial().to_string(),
                    timestamp,
                });
            }
        }
        for (index, cert) in self.certs.iter().enumerate() {
            let issuer = self.certs.get(index + 1).unwrap_or(root);
            cert.verify_issued_by(issuer)?;
        }
        Ok(())
    }
}

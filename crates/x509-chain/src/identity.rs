use serde::{Deserialize, Serialize};
use asn1_rs::Oid;
use x509_parser::der_parser::der::parse_der;
use x509_parser::prelude::*;

use crate::{Certificate, ChainError};

/// Trust-framework extension carrying the member's role URIs
/// (DER SEQUENCE OF UTF8String).
pub const OID_TRUST_FRAMEWORK_ROLES: &[u64] = &[1, 3, 6, 1, 4, 1, 62329, 1, 1];
/// Trust-framework extension carrying the optional application URI
/// (DER UTF8String).
pub const OID_TRUST_FRAMEWORK_APPLICATION: &[u64] = &[1, 3, 6, 1, 4, 1, 62329, 1, 2];

/// Identity of a signing member, extracted from its leaf certificate.
///
/// The verifier embeds this into every decoded step's `_signature` entry, so
/// it serializes with the wire field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    /// Member URL from the subjectAltName URI entry.
    pub member: String,
    /// Role URIs granted by the trust framework registry.
    pub roles: Vec<String>,
    /// Application URI, when the certificate is bound to one application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
}

impl SignerInfo {
    pub fn from_certificate(certificate: &Certificate) -> Result<Self, ChainError> {
        let cert = certificate.parse()?;
        let member = member_uri(&cert)?;
        let roles = match extension_value(&cert, OID_TRUST_FRAMEWORK_ROLES)? {
            Some(value) => utf8_sequence(&value)?,
            None => Vec::new(),
        };
        let application = match extension_value(&cert, OID_TRUST_FRAMEWORK_APPLICATION)? {
            Some(value) => Some(utf8_string(&value)?),
            None => None,
        };
        Ok(Self { member, roles, application })
    }
}

fn member_uri(cert: &X509Certificate<'_>) -> Result<String, ChainError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|err| ChainError::Identity(format!("subject alternative name: {err}")))?
        .ok_or_else(|| {
            ChainError::Identity("certificate has no subject alternative name".into())
        })?;
    san.value
        .general_names
        .iter()
        .find_map(|name| match name {
            GeneralName::URI(uri) => Some(uri.to_string()),
            _ => None,
        })
        .ok_or_else(|| ChainError::Identity("no member URI in subject alternative name".into()))
}

fn extension_value(
    cert: &X509Certificate<'_>,
    oid_arcs: &[u64],
) -> Result<Option<Vec<u8>>, ChainError> {
    let oid = Oid::from(oid_arcs)
        .map_err(|_| ChainError::Identity("invalid extension oid".into()))?;
    let ext = cert
        .get_extension_unique(&oid)
        .map_err(|err| ChainError::Identity(format!("extensions: {err}")))?;
    Ok(ext.map(|ext| ext.value.to_vec()))
}

fn utf8_sequence(bytes: &[u8]) -> Result<Vec<String>, ChainError> {
    let (_, object) =
        parse_der(bytes).map_err(|err| ChainError::Identity(format!("{err:?}")))?;
    let items = object
        .as_sequence()
        .map_err(|err| ChainError::Identity(format!("{err:?}")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .map_err(|err| ChainError::Identity(format!("{err:?}")))
        })
        .collect()
}

fn utf8_string(bytes: &[u8]) -> Result<String, ChainError> {
    let (_, object) =
        parse_der(bytes).map_err(|err| ChainError::Identity(format!("{err:?}")))?;
    object
        .as_str()
        .map(str::to_string)
        .map_err(|err| ChainError::Identity(format!("{err:?}")))
}

//! The record container: builder, sealed record, and the nested sign/verify
//! recursion.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use x509_chain::SignerInfo;

use crate::canonical::data_for_signing;
use crate::certificates::{CertificateMap, CertificateProvider};
use crate::container::{Container, Entry, SigBlock, CURRENT_CONTAINER_FORMAT_VERSION};
use crate::error::RecordError;
use crate::signing::Signer;
use crate::step::{
    decode_step, encode_step, is_canonical_serial, mint_step_id, timestamp_now,
    validate_step_timestamp,
};

/// A sealed record as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    /// Ids of every `origin`-typed step anywhere in the tree.
    pub origins: Vec<String>,
    /// The root container.
    pub steps: Container,
    /// Certificate paths by serial, present on self-contained records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<CertificateMap>,
}

/// Accumulates steps and embedded records, then seals them with [`sign`].
///
/// A builder is never itself signed or verifiable; sealing produces a new
/// [`SealedRecord`] and leaves the builder untouched. To extend a sealed
/// record, call [`SealedRecord::extend`] and accumulate on the fresh builder.
///
/// [`sign`]: RecordBuilder::sign
pub struct RecordBuilder {
    trust_framework: String,
    record: Option<WireRecord>,
    additional_records: Vec<WireRecord>,
    additional_steps: Vec<Map<String, Value>>,
}

impl RecordBuilder {
    /// Starts an empty record for the given trust framework.
    pub fn new(trust_framework: impl Into<String>) -> Self {
        Self {
            trust_framework: trust_framework.into(),
            record: None,
            additional_records: Vec::new(),
            additional_steps: Vec::new(),
        }
    }

    pub fn trust_framework(&self) -> &str {
        &self.trust_framework
    }

    /// Appends a step and returns its freshly minted id, so the caller can
    /// reference it from later steps (`of`, `inputs`, `transfer`,
    /// `permissions`).
    ///
    /// The payload is deep-copied. It must carry a string `type`, must not
    /// carry an `id` (identifiers are allocated here), and must not contain
    /// keys beginning with an underscore, which are reserved for
    /// verifier-attached metadata such as `_signature`. A missing `timestamp`
    /// is filled with the current time; a supplied one must be ISO-8601 UTC
    /// with second precision, and is deliberately independent of signing
    /// time.
    pub fn add_step(&mut self, step: &Value) -> Result<String, RecordError> {
        let supplied = step
            .as_object()
            .ok_or_else(|| RecordError::StepShape("step must be a JSON object".into()))?;
        if supplied.contains_key("id") {
            return Err(RecordError::StepShape(
                "step may not contain an id key; identifiers are allocated automatically and \
                 returned by add_step"
                    .into(),
            ));
        }
        if let Some(key) = supplied.keys().find(|key| key.starts_with('_')) {
            return Err(RecordError::StepShape(format!(
                "step may not contain keys beginning with an underscore: {key}"
            )));
        }
        let mut rest = supplied.clone();
        let step_type = match rest.shift_remove("type") {
            Some(Value::String(step_type)) => step_type,
            Some(_) => return Err(RecordError::StepShape("step type must be a string".into())),
            None => return Err(RecordError::StepShape("step must have a type".into())),
        };
        let timestamp = match rest.shift_remove("timestamp") {
            Some(Value::String(timestamp)) => {
                validate_step_timestamp(&timestamp)?;
                timestamp
            }
            Some(_) => {
                return Err(RecordError::StepShape("step timestamp must be a string".into()))
            }
            None => timestamp_now(),
        };
        let id = mint_step_id();
        let mut step = Map::new();
        step.insert("id".into(), Value::String(id.clone()));
        step.insert("timestamp".into(), Value::String(timestamp));
        step.insert("type".into(), Value::String(step_type));
        for (key, value) in rest {
            step.insert(key, value);
        }
        self.additional_steps.push(step);
        Ok(id)
    }

    /// Embeds a record sealed by another signer. Its wire form is committed
    /// verbatim; the embedded signatures stay independently verifiable.
    pub fn add_record(&mut self, record: &SealedRecord) {
        self.additional_records.push(record.record.clone());
    }

    /// Seals the pending buffer into a new record signed by `signer`.
    ///
    /// The new root container is the prior sealed root (if any), followed by
    /// each embedded record's root, followed by the pending steps, closed by
    /// a fresh signature block. `origins` and `certificates` are merged
    /// additively; the signer's chain is embedded when the certificate
    /// provider's policy asks for it.
    pub fn sign(&self, signer: &dyn Signer) -> Result<SealedRecord, RecordError> {
        let mut entries: Vec<Entry> = Vec::new();
        let mut origins: Vec<String> = Vec::new();
        let mut certificates = CertificateMap::new();
        if let Some(record) = &self.record {
            origins.extend(record.origins.iter().cloned());
            merge_certificates(&mut certificates, record.certificates.as_ref())?;
            entries.push(Entry::Container(record.steps.clone()));
        }
        for record in &self.additional_records {
            origins.extend(record.origins.iter().cloned());
            merge_certificates(&mut certificates, record.certificates.as_ref())?;
            entries.push(Entry::Container(record.steps.clone()));
        }
        for step in &self.additional_steps {
            if step.get("type").and_then(Value::as_str) == Some("origin") {
                if let Some(id) = step.get("id").and_then(Value::as_str) {
                    origins.push(id.to_string());
                }
            }
            entries.push(Entry::Step(encode_step(step)?));
        }

        let serial = signer.serial().to_string();
        let sign_timestamp = timestamp_now();
        let data = data_for_signing(
            &entries,
            CURRENT_CONTAINER_FORMAT_VERSION,
            &serial,
            &sign_timestamp,
        );
        let signature = signer.sign(data.as_bytes())?;
        debug!(serial = %serial, entries = entries.len(), "sealed record container");

        if !certificates.contains_key(&serial) {
            if let Some(chain) = signer.certificates_for_record() {
                if let Some((leaf, issuers)) = chain.split_first() {
                    let mut path = vec![leaf.to_pem()];
                    path.extend(issuers.iter().map(|cert| cert.serial().to_string()));
                    certificates.insert(serial.clone(), path);
                    for cert in issuers {
                        certificates
                            .entry(cert.serial().to_string())
                            .or_insert_with(|| vec![cert.to_pem()]);
                    }
                }
            }
        }

        Ok(SealedRecord {
            trust_framework: self.trust_framework.clone(),
            record: WireRecord {
                origins,
                steps: Container {
                    entries,
                    signature: SigBlock {
                        version: CURRENT_CONTAINER_FORMAT_VERSION,
                        serial,
                        timestamp: sign_timestamp,
                        signature: URL_SAFE.encode(signature),
                    },
                },
                certificates: if certificates.is_empty() { None } else { Some(certificates) },
            },
            verified: None,
        })
    }
}

fn merge_certificates(
    into: &mut CertificateMap,
    from: Option<&CertificateMap>,
) -> Result<(), RecordError> {
    let Some(from) = from else { return Ok(()) };
    for (serial, path) in from {
        match into.get(serial) {
            Some(existing) if existing != path => {
                return Err(RecordError::CertificateConflict(serial.clone()));
            }
            _ => {
                into.insert(serial.clone(), path.clone());
            }
        }
    }
    Ok(())
}

/// A signed record: immutable wire form plus, after [`verify`], the decoded
/// flat step list.
///
/// [`verify`]: SealedRecord::verify
#[derive(Debug)]
pub struct SealedRecord {
    trust_framework: String,
    record: WireRecord,
    verified: Option<Vec<Value>>,
}

impl SealedRecord {
    /// Loads a record received on the wire. The record must carry a `steps`
    /// list.
    pub fn from_wire(trust_framework: impl Into<String>, wire: Value) -> Result<Self, RecordError> {
        if !wire.get("steps").map_or(false, Value::is_array) {
            return Err(RecordError::MalformedRecord(
                "not an encoded provenance record: steps is not a list".into(),
            ));
        }
        let record: WireRecord = serde_json::from_value(wire)
            .map_err(|err| RecordError::MalformedRecord(err.to_string()))?;
        Ok(Self { trust_framework: trust_framework.into(), record, verified: None })
    }

    pub fn from_json(trust_framework: impl Into<String>, json: &str) -> Result<Self, RecordError> {
        let wire: Value = serde_json::from_str(json)
            .map_err(|err| RecordError::MalformedRecord(err.to_string()))?;
        Self::from_wire(trust_framework, wire)
    }

    pub fn trust_framework(&self) -> &str {
        &self.trust_framework
    }

    /// Ids of every origin step in the sealed tree.
    pub fn origins(&self) -> &[String] {
        &self.record.origins
    }

    pub fn wire(&self) -> &WireRecord {
        &self.record
    }

    /// The wire form, for transport alongside a data response.
    pub fn to_value(&self) -> Value {
        let mut wire = Map::new();
        wire.insert(
            "origins".into(),
            Value::Array(self.record.origins.iter().cloned().map(Value::String).collect()),
        );
        wire.insert("steps".into(), self.record.steps.to_value());
        if let Some(certificates) = &self.record.certificates {
            wire.insert(
                "certificates".into(),
                Value::Object(
                    certificates
                        .iter()
                        .map(|(serial, path)| {
                            (
                                serial.clone(),
                                Value::Array(path.iter().cloned().map(Value::String).collect()),
                            )
                        })
                        .collect(),
                ),
            );
        }
        Value::Object(wire)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Starts a fresh builder pre-populated with this sealed record, for the
    /// next participant's additions.
    pub fn extend(&self) -> RecordBuilder {
        RecordBuilder {
            trust_framework: self.trust_framework.clone(),
            record: Some(self.record.clone()),
            additional_records: Vec::new(),
            additional_steps: Vec::new(),
        }
    }

    /// Recursively verifies every signature in the tree and stores the flat
    /// decoded step list.
    ///
    /// On failure the record stays in its prior state; it is never partially
    /// verified.
    pub fn verify(&mut self, provider: &dyn CertificateProvider) -> Result<(), RecordError> {
        let empty = CertificateMap::new();
        let certificates = self.record.certificates.as_ref().unwrap_or(&empty);
        let mut steps = Vec::new();
        let mut signer_stack: Vec<SignerInfo> = Vec::new();
        verify_container(&self.record.steps, certificates, provider, &mut steps, &mut signer_stack)?;
        self.verified = Some(steps);
        Ok(())
    }

    /// The verified flat step list, in tree order, each step carrying the
    /// verifier-attached `_signature` entry. Deep copy.
    pub fn decoded(&self) -> Result<Vec<Value>, RecordError> {
        self.verified.clone().ok_or(RecordError::NotVerified)
    }

    /// Returns the first verified step matching `pattern`.
    ///
    /// Every key in the pattern must be present in the candidate with a
    /// deeply equal value; nested maps match by recursive subset, lists by
    /// equality. The verifier-attached `_signature` entry is matchable, so
    /// callers can require a step to have been signed by a particular member
    /// with a particular role.
    pub fn find_step(&self, pattern: &Value) -> Result<Value, RecordError> {
        let steps = self.verified.as_ref().ok_or(RecordError::NotVerified)?;
        steps
            .iter()
            .find(|step| step_matches(pattern, step))
            .cloned()
            .ok_or(RecordError::StepNotFound)
    }
}

fn verify_container(
    container: &Container,
    certificates: &CertificateMap,
    provider: &dyn CertificateProvider,
    steps: &mut Vec<Value>,
    signer_stack: &mut Vec<SignerInfo>,
) -> Result<(), RecordError> {
    let sig = &container.signature;
    if sig.version != CURRENT_CONTAINER_FORMAT_VERSION {
        return Err(RecordError::UnknownVersion(sig.version));
    }
    if !is_canonical_serial(&sig.serial) {
        return Err(RecordError::BadSerial(sig.serial.clone()));
    }
    let data = data_for_signing(&container.entries, sig.version, &sig.serial, &sig.timestamp);
    let signature =
        URL_SAFE.decode(&sig.signature).map_err(|_| RecordError::SignatureInvalid)?;
    let signer_info =
        provider.verify(certificates, &sig.serial, &sig.timestamp, data.as_bytes(), &signature)?;
    debug!(serial = %sig.serial, member = %signer_info.member, "verified container signature");
    for entry in &container.entries {
        match entry {
            Entry::Container(nested) => {
                signer_stack.push(signer_info.clone());
                verify_container(nested, certificates, provider, steps, signer_stack)?;
                signer_stack.pop();
            }
            Entry::Step(encoded) => {
                let mut step = decode_step(encoded)?;
                // Wrapping signers, innermost first.
                let included_by: Vec<&SignerInfo> = signer_stack.iter().rev().collect();
                step.insert(
                    "_signature".into(),
                    json!({ "signed": &signer_info, "includedBy": included_by }),
                );
                steps.push(Value::Object(step));
            }
        }
    }
    Ok(())
}

fn step_matches(pattern: &Value, candidate: &Value) -> bool {
    match (pattern, candidate) {
        (Value::Object(pattern), Value::Object(candidate)) => pattern
            .iter()
            .all(|(key, value)| candidate.get(key).map_or(false, |found| step_matches(value, found))),
        (pattern, candidate) => pattern == candidate,
    }
}

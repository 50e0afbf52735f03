use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::RecordError;

/// The only container format version this implementation produces.
///
/// Verifiers compare with integer equality and reject anything else; a single
/// record may in principle mix versions across nested containers.
pub const CURRENT_CONTAINER_FORMAT_VERSION: u64 = 0;

/// Terminal signature block of a container:
/// `[version, serial, signTimestamp, base64url(signature)]`.
///
/// `timestamp` is the cryptographic signing time, distinct from any step's
/// domain `timestamp`; the certificate chain must be valid at this instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigBlock {
    pub version: u64,
    pub serial: String,
    pub timestamp: String,
    pub signature: String,
}

/// One element of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// URL-safe base64 of a step's compact canonical JSON.
    Step(String),
    /// A prior signer's sealed sub-tree, committed verbatim.
    Container(Container),
}

/// One signer's sealed contribution: the entries it covers plus the terminal
/// signature block. On the wire this is a JSON array whose last element is
/// the signature block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub entries: Vec<Entry>,
    pub signature: SigBlock,
}

impl Container {
    /// Parses the wire form. Unknown format versions parse successfully and
    /// are rejected by verification, so tampered versions surface as
    /// `UnknownVersion` rather than a parse error.
    pub fn from_value(value: &Value) -> Result<Self, RecordError> {
        let items = value
            .as_array()
            .ok_or_else(|| RecordError::MalformedRecord("container is not a list".into()))?;
        let (sig_block, entries) = items.split_last().ok_or_else(|| {
            RecordError::MalformedRecord("container has no signature block".into())
        })?;
        let entries = entries
            .iter()
            .map(|entry| match entry {
                Value::String(encoded) => Ok(Entry::Step(encoded.clone())),
                Value::Array(_) => Container::from_value(entry).map(Entry::Container),
                _ => Err(RecordError::MalformedRecord(
                    "container entry is neither an encoded step nor a container".into(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries, signature: SigBlock::from_value(sig_block)? })
    }

    pub fn to_value(&self) -> Value {
        let mut items: Vec<Value> = self
            .entries
            .iter()
            .map(|entry| match entry {
                Entry::Step(encoded) => Value::String(encoded.clone()),
                Entry::Container(container) => container.to_value(),
            })
            .collect();
        items.push(self.signature.to_value());
        Value::Array(items)
    }
}

impl SigBlock {
    fn from_value(value: &Value) -> Result<Self, RecordError> {
        let block = value.as_array().ok_or_else(|| {
            RecordError::MalformedRecord("signature block is not a list".into())
        })?;
        if block.len() != 4 {
            return Err(RecordError::MalformedRecord(format!(
                "signature block has {} elements, expected 4",
                block.len()
            )));
        }
        let version = block[0].as_u64().ok_or_else(|| {
            RecordError::MalformedRecord("signature block version is not an integer".into())
        })?;
        let field = |index: usize, name: &str| {
            block[index].as_str().map(str::to_string).ok_or_else(|| {
                RecordError::MalformedRecord(format!("signature block {name} is not a string"))
            })
        };
        Ok(Self {
            version,
            serial: field(1, "serial")?,
            timestamp: field(2, "timestamp")?,
            signature: field(3, "signature")?,
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::from(self.version),
            Value::from(self.serial.clone()),
            Value::from(self.timestamp.clone()),
            Value::from(self.signature.clone()),
        ])
    }
}

impl Serialize for Container {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.entries.len() + 1))?;
        for entry in &self.entries {
            match entry {
                Entry::Step(encoded) => seq.serialize_element(encoded)?,
                Entry::Container(container) => seq.serialize_element(container)?,
            }
        }
        seq.serialize_element(&self.signature)?;
        seq.end()
    }
}

impl Serialize for SigBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.version)?;
        seq.serialize_element(&self.serial)?;
        seq.serialize_element(&self.timestamp)?;
        seq.serialize_element(&self.signature)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Container {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Container::from_value(&value).map_err(D::Error::custom)
    }
}

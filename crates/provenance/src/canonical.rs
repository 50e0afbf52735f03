//! Canonical data-for-signing construction.
//!
//! Signer and verifier must produce byte-identical output from the same tree
//! or every signature fails. The encoding is prefix-free over the container
//! alphabet: step boundaries are explicit (`.` joins), nesting is explicit
//! (`%`…`&` brackets), and the signing level's version, serial, and timestamp
//! trail the entries.

use crate::container::{Container, Entry};

/// Serializes `entries` plus the signing level's signature-block fields into
/// the string the signature covers.
pub fn data_for_signing(entries: &[Entry], version: u64, serial: &str, timestamp: &str) -> String {
    let mut gather: Vec<String> = Vec::new();
    gather_entries(entries, &mut gather);
    gather.push(version.to_string());
    gather.push(serial.to_string());
    gather.push(timestamp.to_string());
    gather.join(".")
}

fn gather_entries(entries: &[Entry], gather: &mut Vec<String>) {
    for entry in entries {
        match entry {
            Entry::Step(encoded) => gather.push(encoded.clone()),
            Entry::Container(container) => {
                gather.push("%".to_string());
                gather.push(serialize_container(container));
                gather.push("&".to_string());
            }
        }
    }
}

// A nested container serializes in full: its own signature block is part of
// the bytes the enclosing level commits to, and appears as one more nested
// list with the version stringified.
fn serialize_container(container: &Container) -> String {
    let mut gather: Vec<String> = Vec::new();
    gather_entries(&container.entries, &mut gather);
    let sig = &container.signature;
    gather.push("%".to_string());
    gather.push(format!(
        "{}.{}.{}.{}",
        sig.version, sig.serial, sig.timestamp, sig.signature
    ));
    gather.push("&".to_string());
    gather.join(".")
}

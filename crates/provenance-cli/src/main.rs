//! # Provenance Record Decoder
//!
//! Reads a JSON provenance record on stdin, verifies every signature in it
//! against the given trust-framework root CA, and prints the decoded flat
//! step list, each step annotated with the member that signed it and the
//! members that later wrapped it. Exits non-zero on any verification
//! failure.
//!
//! ## Examples
//!
//! Verify a self-contained record:
//! ```bash
//! provenance-cli root-ca-cert.pem < record.json
//! ```
//!
//! Verify a directory-backed record against local certificate bundles:
//! ```bash
//! provenance-cli root-ca-cert.pem --certificate-directory certs/ < record.json
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use provenance::{CertificateProvider, DirectoryProvider, SealedRecord, SelfContainedProvider};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Command line arguments for the record decoder
#[derive(Parser)]
#[command(name = "provenance-cli")]
#[command(version)]
#[command(about = "Verify a provenance record and print its decoded steps")]
struct ProvenanceCli {
    /// Path to the PEM encoded root signing CA certificate
    root_ca: PathBuf,

    /// Resolve certificates from `<serial>-bundle.pem` files in this
    /// directory when they are not embedded in the record
    #[clap(long)]
    certificate_directory: Option<PathBuf>,

    /// Trust framework the record belongs to
    #[clap(long, default_value = "https://registry.core.trust.ib1.org/trust-framework")]
    trust_framework: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = ProvenanceCli::parse();
    let provider: Box<dyn CertificateProvider> = match &cli.certificate_directory {
        Some(directory) => {
            Box::new(DirectoryProvider::from_file(&cli.root_ca, directory.clone())?)
        }
        None => Box::new(SelfContainedProvider::from_file(&cli.root_ca)?),
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading record from stdin")?;
    let mut record = SealedRecord::from_json(&cli.trust_framework, &input)?;
    record.verify(provider.as_ref())?;

    let decoded = record.decoded()?;
    tracing::info!(steps = decoded.len(), "record verified");
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

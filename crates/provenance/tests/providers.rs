//! Certificate provider behaviour: self-contained versus directory-backed
//! records, chain validity at the signing timestamp, and KMS-backed signing.

mod common;

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use common::{TestAuthority, TRUST_FRAMEWORK};
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::SigningKey;
use p256::pkcs8::DecodePrivateKey as _;
use provenance::{
    data_for_signing, CertificateProvider, Container, DirectoryProvider, Entry, KmsClient,
    RecordBuilder, RecordError, SealedRecord, SigBlock, SignerKms,
    CURRENT_CONTAINER_FORMAT_VERSION,
};
use serde_json::{json, Value};

fn strip_ids(mut steps: Vec<Value>) -> Vec<Value> {
    for step in &mut steps {
        step.as_object_mut().unwrap().remove("id");
    }
    steps
}

#[test]
fn self_contained_and_directory_records_decode_identically() {
    let authority = TestAuthority::new();
    let member = authority.member(123456, "https://directory.example.org/member/123456", &[]);
    let step = json!({
        "type": "origin",
        "timestamp": "2026-01-05T09:00:00Z",
        "origin": "https://www.smartdcc.co.uk/",
    });

    // Self-contained: the signer's chain is embedded at sign time.
    let sc_provider = authority.self_contained_provider();
    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&step).unwrap();
    let mut sc_sealed = builder.sign(&member.signer(sc_provider.clone())).unwrap();
    sc_sealed.verify(sc_provider.as_ref()).unwrap();

    let certificates = sc_sealed.wire().certificates.as_ref().unwrap();
    assert!(certificates.contains_key(&member.serial));
    assert!(certificates.contains_key(&authority.issuing_serial));
    // Leaf path: own PEM plus a serial reference to the shared issuer.
    assert_eq!(certificates[&member.serial].len(), 2);
    assert_eq!(certificates[&member.serial][1], authority.issuing_serial);
    assert_eq!(certificates[&authority.issuing_serial].len(), 1);

    // Directory-backed: nothing embedded, chain resolved from bundle files.
    let directory = tempfile::tempdir().unwrap();
    std::fs::write(
        directory.path().join(format!("{}-bundle.pem", member.serial)),
        &member.bundle_pem,
    )
    .unwrap();
    let dir_provider: Arc<dyn CertificateProvider> = Arc::new(
        DirectoryProvider::new(&authority.root_pem, directory.path().to_path_buf()).unwrap(),
    );
    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&step).unwrap();
    let mut dir_sealed = builder.sign(&member.signer(dir_provider.clone())).unwrap();
    dir_sealed.verify(dir_provider.as_ref()).unwrap();

    assert!(dir_sealed.wire().certificates.is_none());

    // Byte-different wire, identical decoded view apart from minted ids.
    assert_eq!(
        strip_ids(sc_sealed.decoded().unwrap()),
        strip_ids(dir_sealed.decoded().unwrap())
    );
}

#[test]
fn directory_provider_reports_missing_bundles() {
    let authority = TestAuthority::new();
    let member = authority.member(123457, "https://directory.example.org/member/123457", &[]);
    let directory = tempfile::tempdir().unwrap();
    let dir_provider: Arc<dyn CertificateProvider> = Arc::new(
        DirectoryProvider::new(&authority.root_pem, directory.path().to_path_buf()).unwrap(),
    );

    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&json!({"type": "origin"})).unwrap();
    let mut sealed = builder.sign(&member.signer(dir_provider.clone())).unwrap();
    let err = sealed.verify(dir_provider.as_ref()).unwrap_err();
    assert!(matches!(err, RecordError::CertificateNotFound(_)), "{err}");
}

#[test]
fn directory_provider_prefers_certificates_from_the_record() {
    let authority = TestAuthority::new();
    let member = authority.member(123458, "https://directory.example.org/member/123458", &[]);

    // Sealed self-contained, so the chain travels in the record.
    let sc_provider = authority.self_contained_provider();
    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&json!({"type": "origin"})).unwrap();
    let sealed = builder.sign(&member.signer(sc_provider)).unwrap();

    // A directory provider with an empty store still verifies it.
    let directory = tempfile::tempdir().unwrap();
    let dir_provider: Arc<dyn CertificateProvider> = Arc::new(
        DirectoryProvider::new(&authority.root_pem, directory.path().to_path_buf()).unwrap(),
    );
    let mut loaded = SealedRecord::from_wire(TRUST_FRAMEWORK, sealed.to_value()).unwrap();
    loaded.verify(dir_provider.as_ref()).unwrap();
}

#[test]
fn certificate_expired_at_signing_time_fails() {
    let authority = TestAuthority::new();
    // Leaf expired years before the record is signed (now).
    let member = authority.member_with_validity(
        424242,
        "https://directory.example.org/member/424242",
        &[],
        (2020, 2021),
    );
    let provider = authority.self_contained_provider();
    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&json!({"type": "origin"})).unwrap();
    let mut sealed = builder.sign(&member.signer(provider.clone())).unwrap();
    let err = sealed.verify(provider.as_ref()).unwrap_err();
    assert!(matches!(err, RecordError::ChainInvalid(_)), "{err}");
}

#[test]
fn record_signed_before_leaf_expiry_still_verifies() {
    let authority = TestAuthority::new();
    // Valid through 2024, expired by the time this test runs; the record was
    // signed mid-2024, so its chain must still check out.
    let member = authority.member_with_validity(
        424243,
        "https://directory.example.org/member/424243",
        &[],
        (2024, 2025),
    );
    let signing_key = SigningKey::from_pkcs8_pem(&member.key_pem).unwrap();

    let step_json =
        r#"{"id":"pastrecordstep1","timestamp":"2024-06-01T12:00:00Z","type":"origin"}"#;
    let entries = vec![Entry::Step(URL_SAFE.encode(step_json))];
    let sign_timestamp = "2024-06-01T12:00:00Z";
    let data = data_for_signing(
        &entries,
        CURRENT_CONTAINER_FORMAT_VERSION,
        &member.serial,
        sign_timestamp,
    );
    let signature: p256::ecdsa::Signature = signing_key.sign(data.as_bytes());
    let container = Container {
        entries,
        signature: SigBlock {
            version: CURRENT_CONTAINER_FORMAT_VERSION,
            serial: member.serial.clone(),
            timestamp: sign_timestamp.to_string(),
            signature: URL_SAFE.encode(signature.to_der().as_bytes()),
        },
    };
    let wire = json!({"origins": ["pastrecordstep1"], "steps": container.to_value()});

    let directory = tempfile::tempdir().unwrap();
    std::fs::write(
        directory.path().join(format!("{}-bundle.pem", member.serial)),
        &member.bundle_pem,
    )
    .unwrap();
    let provider =
        DirectoryProvider::new(&authority.root_pem, directory.path().to_path_buf()).unwrap();

    let mut record = SealedRecord::from_wire(TRUST_FRAMEWORK, wire).unwrap();
    record.verify(&provider).unwrap();
    let decoded = record.decoded().unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0]["id"], "pastrecordstep1");
}

struct LocalDigestKms {
    key: SigningKey,
}

impl KmsClient for LocalDigestKms {
    fn sign_digest(
        &self,
        _key_id: &str,
        _signing_algorithm: &str,
        digest: &[u8; 32],
    ) -> anyhow::Result<Vec<u8>> {
        let signature: p256::ecdsa::Signature = self.key.sign_prehash(digest)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

#[test]
fn kms_signed_records_are_interchangeable() {
    let authority = TestAuthority::new();
    let provider = authority.self_contained_provider();
    let member = authority.member(555555, "https://directory.example.org/member/555555", &[]);

    let certificates = provenance::Certificate::list_from_pem(&member.bundle_pem).unwrap();
    let client = LocalDigestKms { key: SigningKey::from_pkcs8_pem(&member.key_pem).unwrap() };
    let signer = SignerKms::new(provider.clone(), certificates, client, "alias/test").unwrap();

    let mut builder = RecordBuilder::new(TRUST_FRAMEWORK);
    builder.add_step(&json!({"type": "origin"})).unwrap();
    let mut sealed = builder.sign(&signer).unwrap();
    sealed.verify(provider.as_ref()).unwrap();
    assert_eq!(sealed.decoded().unwrap().len(), 1);
}

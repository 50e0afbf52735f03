//! Shared certificate fixtures: a root CA, an issuing CA beneath it, and
//! member credentials carrying the trust-framework identity extensions.

#![allow(dead_code)]

use std::sync::Arc;

use provenance::x509_chain::{OID_TRUST_FRAMEWORK_APPLICATION, OID_TRUST_FRAMEWORK_ROLES};
use provenance::{CertificateProvider, Certificate, SelfContainedProvider, SignerInMemory};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DnType, Ia5String, IsCa, KeyPair,
    SanType, SerialNumber,
};

pub const TRUST_FRAMEWORK: &str = "https://registry.core.trust.ib1.org/trust-framework";

pub struct TestAuthority {
    pub root_pem: String,
    pub issuing_pem: String,
    pub issuing_serial: String,
    issuing: rcgen::Certificate,
    issuing_key: KeyPair,
}

pub struct MemberCredentials {
    pub serial: String,
    pub member_url: String,
    /// Leaf certificate first, issuing CA after it.
    pub bundle_pem: String,
    pub leaf_pem: String,
    pub key_pem: String,
}

impl TestAuthority {
    pub fn new() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let mut root_params = CertificateParams::default();
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params
            .distinguished_name
            .push(DnType::CommonName, "Test Trust Framework Root CA");
        root_params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        root_params.not_after = rcgen::date_time_ymd(2045, 1, 1);
        let root = root_params.self_signed(&root_key).unwrap();

        let issuing_key = KeyPair::generate().unwrap();
        let mut issuing_params = CertificateParams::default();
        issuing_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        issuing_params
            .distinguished_name
            .push(DnType::CommonName, "Test Trust Framework Signing Issuer");
        issuing_params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        issuing_params.not_after = rcgen::date_time_ymd(2045, 1, 1);
        let issuing = issuing_params.signed_by(&issuing_key, &root, &root_key).unwrap();

        let issuing_serial =
            Certificate::from_pem(&issuing.pem()).unwrap().serial().to_string();
        Self {
            root_pem: root.pem(),
            issuing_pem: issuing.pem(),
            issuing_serial,
            issuing,
            issuing_key,
        }
    }

    /// Issues a member certificate valid well past the tests' lifetime.
    pub fn member(&self, serial: u64, member_url: &str, roles: &[&str]) -> MemberCredentials {
        self.member_with_validity(serial, member_url, roles, (2023, 2043))
    }

    pub fn member_with_validity(
        &self,
        serial: u64,
        member_url: &str,
        roles: &[&str],
        years: (i32, i32),
    ) -> MemberCredentials {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.serial_number = Some(SerialNumber::from(serial_bytes(serial)));
        params.distinguished_name.push(DnType::CommonName, member_url);
        params.not_before = rcgen::date_time_ymd(years.0, 1, 1);
        params.not_after = rcgen::date_time_ymd(years.1, 1, 1);
        params
            .subject_alt_names
            .push(SanType::URI(Ia5String::try_from(member_url).unwrap()));
        params.custom_extensions.push(CustomExtension::from_oid_content(
            OID_TRUST_FRAMEWORK_ROLES,
            der_utf8_sequence(roles),
        ));
        params.custom_extensions.push(CustomExtension::from_oid_content(
            OID_TRUST_FRAMEWORK_APPLICATION,
            der_utf8(&format!("{member_url}/application/1")),
        ));
        let cert = params.signed_by(&key, &self.issuing, &self.issuing_key).unwrap();

        let leaf_pem = cert.pem();
        let serial = Certificate::from_pem(&leaf_pem).unwrap().serial().to_string();
        MemberCredentials {
            serial,
            member_url: member_url.to_string(),
            bundle_pem: format!("{leaf_pem}{}", self.issuing_pem),
            leaf_pem,
            key_pem: key.serialize_pem(),
        }
    }

    pub fn self_contained_provider(&self) -> Arc<dyn CertificateProvider> {
        Arc::new(SelfContainedProvider::new(&self.root_pem).unwrap())
    }
}

impl MemberCredentials {
    pub fn signer(&self, provider: Arc<dyn CertificateProvider>) -> SignerInMemory {
        SignerInMemory::from_pem(provider, &self.bundle_pem, &self.key_pem).unwrap()
    }
}

fn serial_bytes(serial: u64) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[start..].to_vec()
}

fn der_length(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    }
}

fn der_utf8(value: &str) -> Vec<u8> {
    let mut out = vec![0x0c];
    out.extend(der_length(value.len()));
    out.extend(value.as_bytes());
    out
}

fn der_utf8_sequence(values: &[&str]) -> Vec<u8> {
    let content: Vec<u8> = values.iter().flat_map(|value| der_utf8(value)).collect();
    let mut out = vec![0x30];
    out.extend(der_length(content.len()));
    out.extend(content);
    out
}

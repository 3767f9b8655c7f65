//! Test identities generated on the fly
//!
//! Mirrors the certificates found on gematik test cards closely enough for
//! classification: a certificate-policy OID, subject attributes, and an RSA 2048 or
//! brainpoolP256r1 key, wrapped into a PKCS#12 store protected with `00`.

use openssl::asn1::{Asn1Object, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};
use std::path::{Path, PathBuf};

pub(crate) const PASSWORD: &str = "00";

pub(crate) const EGK_AUT: &str = "1.2.276.0.76.4.70";
pub(crate) const EGK_ENC: &str = "1.2.276.0.76.4.68";
pub(crate) const HBA_AUT: &str = "1.2.276.0.76.4.75";
pub(crate) const HBA_QES: &str = "1.2.276.0.76.4.72";
pub(crate) const SMCB_AUT: &str = "1.2.276.0.76.4.77";
pub(crate) const SMCB_OSIG: &str = "1.2.276.0.76.4.78";

pub(crate) const ICCSN: &str = "80276883110000113311";
pub(crate) const KVNR: &str = "X110406067";

#[derive(Clone, Copy)]
pub(crate) enum KeyKind {
    Rsa,
    Ec,
}

/// Builder for a self-signed test identity
#[derive(Clone)]
pub(crate) struct IdentityBuilder {
    policies: String,
    key_kind: KeyKind,
    subject: Vec<(Nid, String)>,
    validity_days: u32,
}

impl IdentityBuilder {
    /// `policies` is a comma separated list of certificate-policy OIDs
    pub(crate) fn new(policies: &str) -> Self {
        Self {
            policies: policies.to_string(),
            key_kind: KeyKind::Rsa,
            subject: vec![(Nid::COMMONNAME, "Test Identity".to_string())],
            validity_days: 365,
        }
    }

    /// eGK AUT identity of Heinz Hillbert with KVNR and institution number
    pub(crate) fn egk_aut() -> Self {
        Self::new(EGK_AUT)
            .subject(Nid::GIVENNAME, "Heinz")
            .subject(Nid::SURNAME, "Hillbert")
            .subject(Nid::ORGANIZATIONALUNITNAME, "109500969")
            .subject(Nid::ORGANIZATIONALUNITNAME, KVNR)
    }

    pub(crate) fn ec(mut self) -> Self {
        self.key_kind = KeyKind::Ec;
        self
    }

    pub(crate) fn subject(mut self, nid: Nid, value: &str) -> Self {
        self.subject.push((nid, value.to_string()));
        self
    }

    pub(crate) fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    pub(crate) fn build(&self) -> (PKey<Private>, X509) {
        let key = match self.key_kind {
            KeyKind::Rsa => PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap(),
            KeyKind::Ec => {
                let group = EcGroup::from_curve_name(Nid::BRAINPOOL_P256R1).unwrap();
                PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
            }
        };

        let mut name = X509NameBuilder::new().unwrap();
        for (nid, value) in &self.subject {
            name.append_entry_by_nid(*nid, value).unwrap();
        }
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(0x1234).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(self.validity_days).unwrap())
            .unwrap();

        let value = format!("DER:{}", hex::encode_upper(policies_der(&self.policies)));
        #[allow(deprecated)]
        let policies = {
            let context = builder.x509v3_context(None, None);
            X509Extension::new_nid(None, Some(&context), Nid::CERTIFICATE_POLICIES, &value)
                .unwrap()
        };
        builder.append_extension(policies).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        (key, builder.build())
    }

    /// Build the identity and store it as `dir/file_name`
    pub(crate) fn write_p12(&self, dir: &Path, file_name: &str) -> PathBuf {
        let (key, cert) = self.build();
        write_p12(dir, file_name, &key, &cert, PASSWORD)
    }
}

/// DER of `certificatePolicies`: a SEQUENCE of PolicyInformation, each holding only
/// its policy identifier
///
/// The textual `certificatePolicies` syntax needs an OpenSSL config database, so the
/// extension value is handed over as raw DER instead.
pub(crate) fn policies_der(policies: &str) -> Vec<u8> {
    let mut information = Vec::new();
    for oid in policies.split(',').map(str::trim).filter(|oid| !oid.is_empty()) {
        let object = Asn1Object::from_str(oid).unwrap();
        let identifier = der_tlv(0x06, object.as_slice());
        information.extend(der_tlv(0x30, &identifier));
    }
    der_tlv(0x30, &information)
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut tlv = vec![tag];
    match content.len() {
        len @ 0..=0x7F => tlv.push(len as u8),
        len @ 0x80..=0xFF => tlv.extend([0x81, len as u8]),
        len => tlv.extend([0x82, (len >> 8) as u8, len as u8]),
    }
    tlv.extend_from_slice(content);
    tlv
}

pub(crate) fn write_p12(
    dir: &Path,
    file_name: &str,
    key: &PKey<Private>,
    cert: &X509,
    password: &str,
) -> PathBuf {
    let der = Pkcs12::builder()
        .name("alias")
        .pkey(key)
        .cert(cert)
        .build2(password)
        .unwrap()
        .to_der()
        .unwrap();
    let path = dir.join(file_name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, der).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies_der() {
        // 1.2.276.0.76.4.70 encodes as 2A 82 14 00 4C 04 46
        assert_eq!(
            hex::encode_upper(policies_der(EGK_AUT)),
            "300B300906072A8214004C0446"
        );
        assert_eq!(policies_der(&format!("{EGK_AUT}, {EGK_ENC}"))[1], 0x16);
    }

    #[test]
    fn test_built_certificate_carries_policy() {
        let (_, cert) = IdentityBuilder::new(HBA_QES).build();
        let der = cert.to_der().unwrap();
        let policy = &policies_der(HBA_QES)[2..];
        assert!(der.windows(policy.len()).any(|window| window == policy));
    }
}

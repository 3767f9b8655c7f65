//! Certificate Element Module
//!
//! Reads single-entry PKCS#12 keystores and derives the facts needed to place their key
//! material on a simulated card.
//!
//! # Derived facts
//!
//! - **Profile** (card type and certificate purpose): from the certificate-policy OIDs,
//!   see [`crate::card_types`]. Exactly one known OID must be present.
//! - **Crypto**: from the certificate's signature algorithm.
//! - **ICCSN**: from the file name (`80276883110000113311-C_CH_AUT_R2048.p12`), or else
//!   from the subject `serialNumber` after its last `.`.
//! - **Holder name** and, for patient cards, the **KVNR** from subject attributes.
//!
//! # Example
//!
//! ```no_run
//! use smartcard_image::certificate_element::KeystoreReader;
//!
//! let reader = KeystoreReader::new("00");
//! let element = reader.extract("keystores/80276883110000113311-C_CH_AUT_R2048.p12")?;
//! println!("{} {} {}", element.iccsn(), element.card_type(), element.cert_type());
//! # Ok::<(), smartcard_image::error::Error>(())
//! ```

use crate::card_types::{CardType, CertType, CertificateProfile, Crypto};
use crate::error::{Error, Result};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use x509_parser::extensions::ParsedExtension;

pub const PKCS12_EXTENSION: &str = "p12";

/// Length of a KVNR (health insurance identifier)
const KVNR_LENGTH: usize = 10;

/// Private key and certificate of one keystore, classified
#[derive(Clone)]
pub struct CertificateElement {
    private_key: PKey<Private>,
    certificate: X509,
    path: PathBuf,
    profile: CertificateProfile,
    crypto: Crypto,
    iccsn: String,
}

impl CertificateElement {
    /// Wrap a key pair read from `path`, classifying the certificate
    ///
    /// # Errors
    /// * [`Error::Classification`] - no or more than one known policy OID, or an unknown
    ///   signature algorithm
    /// * [`Error::Iccsn`] - neither file name nor subject yield an ICCSN
    pub fn new(private_key: PKey<Private>, certificate: X509, path: &Path) -> Result<Self> {
        let der = certificate
            .to_der()
            .map_err(|e| Error::keystore(path, format!("cannot encode certificate: {e}")))?;
        let (profile, crypto) = classify(path, &der)?;
        let iccsn = iccsn_from_file_name(path)
            .or_else(|| iccsn_from_subject(&certificate))
            .ok_or_else(|| Error::Iccsn {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            private_key,
            certificate,
            path: path.to_path_buf(),
            profile,
            crypto,
            iccsn,
        })
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn profile(&self) -> CertificateProfile {
        self.profile
    }

    pub fn card_type(&self) -> CardType {
        self.profile.card_type
    }

    pub fn cert_type(&self) -> CertType {
        self.profile.cert_type
    }

    pub fn crypto(&self) -> Crypto {
        self.crypto
    }

    pub fn iccsn(&self) -> &str {
        &self.iccsn
    }

    pub fn is_authentication(&self) -> bool {
        self.cert_type() == CertType::Authentication
    }

    /// Surname and given name of the holder, if the subject carries either
    pub fn holder_name(&self) -> Option<String> {
        let parts: Vec<String> = subject_values(&self.certificate, Nid::SURNAME)
            .into_iter()
            .chain(subject_values(&self.certificate, Nid::GIVENNAME))
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// KVNR of a patient card: the organizational unit of exactly ten characters
    pub fn health_insurance_id(&self) -> Result<String> {
        if self.card_type() != CardType::Egk {
            return Err(Error::HealthInsuranceId {
                path: self.path.clone(),
                reason: format!("only patient cards carry one, this is {}", self.card_type()),
            });
        }
        subject_values(&self.certificate, Nid::ORGANIZATIONALUNITNAME)
            .into_iter()
            .find(|value| value.chars().count() == KVNR_LENGTH)
            .ok_or_else(|| Error::HealthInsuranceId {
                path: self.path.clone(),
                reason: format!("no organizational unit of length {KVNR_LENGTH}"),
            })
    }
}

impl fmt::Debug for CertificateElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateElement")
            .field("path", &self.path)
            .field("iccsn", &self.iccsn)
            .field("profile", &self.profile)
            .field("crypto", &self.crypto)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

fn subject_values(certificate: &X509, nid: Nid) -> Vec<String> {
    certificate
        .subject_name()
        .entries_by_nid(nid)
        .filter_map(|entry| entry.data().as_utf8().ok())
        .map(|value| value.to_string())
        .collect()
}

fn classify(path: &Path, der: &[u8]) -> Result<(CertificateProfile, Crypto)> {
    let (_, parsed) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| Error::keystore(path, format!("cannot parse certificate: {e}")))?;

    let mut profiles = Vec::new();
    for extension in parsed.extensions() {
        if let ParsedExtension::CertificatePolicies(policies) = extension.parsed_extension() {
            for policy in policies.iter() {
                let oid = policy.policy_id.to_id_string();
                if let Some(profile) = CertificateProfile::from_policy_oid(&oid) {
                    profiles.push((oid, profile));
                }
            }
        }
    }

    let profile = match profiles.as_slice() {
        [] => {
            return Err(Error::classification(
                path,
                "no known card/certificate type OID",
            ))
        }
        [(_, profile)] => *profile,
        many => {
            let oids: Vec<&str> = many.iter().map(|(oid, _)| oid.as_str()).collect();
            return Err(Error::classification(
                path,
                format!("ambiguous certificate type OIDs: {}", oids.join(", ")),
            ));
        }
    };

    let algorithm = parsed.signature_algorithm.algorithm.to_id_string();
    let crypto = Crypto::from_signature_algorithm(&algorithm).ok_or_else(|| {
        Error::classification(path, format!("unsupported signature algorithm {algorithm}"))
    })?;

    Ok((profile, crypto))
}

/// Numeric token of at least two digits before the first `-` or `_` of the file name
fn iccsn_from_file_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let token = &file_name[..file_name.find(['-', '_'])?];
    if token.len() >= 2 && token.bytes().all(|b| b.is_ascii_digit()) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Subject serialNumber, after its last `.`
fn iccsn_from_subject(certificate: &X509) -> Option<String> {
    let serial = subject_values(certificate, Nid::SERIALNUMBER)
        .into_iter()
        .next()?;
    let iccsn = match serial.rfind('.') {
        Some(index) => &serial[index + 1..],
        None => serial.as_str(),
    };
    if iccsn.is_empty() {
        None
    } else {
        Some(iccsn.to_string())
    }
}

/// Opens keystores with the password shared by all test identities
pub struct KeystoreReader {
    password: SecretString,
}

impl KeystoreReader {
    pub fn new(password: impl Into<SecretString>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Read the single private-key entry of the keystore at `path`
    pub fn extract<P: AsRef<Path>>(&self, path: P) -> Result<CertificateElement> {
        let path = path.as_ref();
        if !is_keystore(path) {
            return Err(Error::keystore(path, "not a .p12 file"));
        }

        let der = fs::read(path).map_err(|e| Error::io(path, e))?;
        let store = Pkcs12::from_der(&der)
            .and_then(|p12| p12.parse2(self.password.expose_secret()))
            .map_err(|e| Error::keystore(path, format!("cannot open store: {e}")))?;

        let private_key = store
            .pkey
            .ok_or_else(|| Error::keystore(path, "store holds no private key entry"))?;
        let certificate = store
            .cert
            .ok_or_else(|| Error::keystore(path, "private key entry has no certificate"))?;

        let element = CertificateElement::new(private_key, certificate, path)?;
        debug!(
            "Read {} {} {} for ICCSN {} from {}",
            element.card_type(),
            element.cert_type(),
            element.crypto(),
            element.iccsn(),
            path.display()
        );
        Ok(element)
    }

    /// Extract every keystore below `dir`, in path order; the first failure aborts
    pub fn scan<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<CertificateElement>> {
        find_keystores(dir.as_ref())?
            .iter()
            .map(|path| self.extract(path))
            .collect()
    }
}

impl fmt::Debug for KeystoreReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreReader")
            .field("password", &"<redacted>")
            .finish()
    }
}

fn is_keystore(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(PKCS12_EXTENSION))
}

/// All `.p12` files below `dir`, sorted, without descending into symlinked directories
pub fn find_keystores(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current).map_err(|e| Error::io(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&current, e))?;
            let path = entry.path();
            // symlinked directories are not followed, every keystore is read once
            let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if is_keystore(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

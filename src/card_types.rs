//! Card Types Module
//!
//! Closed classification tables for health-card identities. Every lookup is an exhaustive
//! `match`, so an OID that is not listed here fails loudly instead of falling through to a
//! default.
//!
//! # Certificate profiles
//!
//! gematik certificates carry a certificate-policy OID that names both the card the key
//! lives on and the purpose of the certificate:
//!
//! ```text
//! 1.2.276.0.76.4.70  eGK    AUT
//! 1.2.276.0.76.4.68  eGK    ENC
//! 1.2.276.0.76.4.75  HBA    AUT
//! 1.2.276.0.76.4.74  HBA    ENC
//! 1.2.276.0.76.4.72  HBA    QES
//! 1.2.276.0.76.4.77  SMC-B  AUT
//! 1.2.276.0.76.4.76  SMC-B  ENC
//! 1.2.276.0.76.4.78  SMC-B  OSIG
//! ```

use serde::Serialize;
use std::fmt;

/// Physical card type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CardType {
    /// Patient card (elektronische Gesundheitskarte)
    #[serde(rename = "EGK")]
    Egk,
    /// Practitioner card (Heilberufsausweis)
    #[serde(rename = "HBA")]
    Hba,
    /// Institution card
    #[serde(rename = "SMC-B")]
    SmcB,
}

impl CardType {
    /// Code used in the image manifest
    pub fn code(self) -> &'static str {
        match self {
            CardType::Egk => "EGK",
            CardType::Hba => "HBA",
            CardType::SmcB => "SMC-B",
        }
    }

    /// Lowercase stem used for template and output file names
    pub fn file_stem(self) -> &'static str {
        match self {
            CardType::Egk => "egk",
            CardType::Hba => "hba",
            CardType::SmcB => "smc_b",
        }
    }

    /// Role of the key holder as it appears in card image slot names
    pub fn role(self) -> &'static str {
        match self {
            CardType::Egk => "CH",
            CardType::Hba => "HP",
            CardType::SmcB => "HCI",
        }
    }

    pub fn template_name(self) -> String {
        format!("{}_template.xml", self.file_stem())
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Purpose of a certificate on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CertType {
    #[serde(rename = "AUT")]
    Authentication,
    #[serde(rename = "ENC")]
    Encryption,
    #[serde(rename = "OSIG")]
    OrganizationalSignature,
    #[serde(rename = "QES")]
    QualifiedSignature,
}

impl CertType {
    pub fn code(self) -> &'static str {
        match self {
            CertType::Authentication => "AUT",
            CertType::Encryption => "ENC",
            CertType::OrganizationalSignature => "OSIG",
            CertType::QualifiedSignature => "QES",
        }
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

const PKCS1_ARC: &str = "1.2.840.113549.1.1";
const ECDSA_SIGNATURE_ARC: &str = "1.2.840.10045.4";

/// Crypto family of a key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Crypto {
    #[serde(rename = "R2048")]
    Rsa2048,
    #[serde(rename = "E256")]
    Ecc256,
}

impl Crypto {
    pub fn code(self) -> &'static str {
        match self {
            Crypto::Rsa2048 => "R2048",
            Crypto::Ecc256 => "E256",
        }
    }

    /// Classify by the dotted signature algorithm OID of a certificate: anything below
    /// the PKCS#1 arc is RSA, anything below the ECDSA signature arc is ECC
    pub fn from_signature_algorithm(oid: &str) -> Option<Self> {
        let below = |arc: &str| {
            oid.strip_prefix(arc)
                .and_then(|rest| rest.strip_prefix('.'))
                .is_some_and(|rest| !rest.is_empty())
        };
        if below(PKCS1_ARC) {
            Some(Crypto::Rsa2048)
        } else if below(ECDSA_SIGNATURE_ARC) {
            Some(Crypto::Ecc256)
        } else {
            None
        }
    }
}

impl fmt::Display for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Card type and purpose named by a single certificate-policy OID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertificateProfile {
    pub card_type: CardType,
    pub cert_type: CertType,
}

impl CertificateProfile {
    const fn new(card_type: CardType, cert_type: CertType) -> Self {
        Self {
            card_type,
            cert_type,
        }
    }

    pub fn from_policy_oid(oid: &str) -> Option<Self> {
        use CardType::*;
        use CertType::*;
        let profile = match oid {
            "1.2.276.0.76.4.70" => Self::new(Egk, Authentication),
            "1.2.276.0.76.4.68" => Self::new(Egk, Encryption),
            "1.2.276.0.76.4.75" => Self::new(Hba, Authentication),
            "1.2.276.0.76.4.74" => Self::new(Hba, Encryption),
            "1.2.276.0.76.4.72" => Self::new(Hba, QualifiedSignature),
            "1.2.276.0.76.4.77" => Self::new(SmcB, Authentication),
            "1.2.276.0.76.4.76" => Self::new(SmcB, Encryption),
            "1.2.276.0.76.4.78" => Self::new(SmcB, OrganizationalSignature),
            _ => return None,
        };
        Some(profile)
    }

    /// Slot holding the certificate file, e.g. `EF.C.CH.AUT.R2048`
    pub fn certificate_slot(&self, crypto: Crypto) -> String {
        format!(
            "EF.C.{}.{}.{}",
            self.card_type.role(),
            self.cert_type.code(),
            crypto.code()
        )
    }

    /// Slot holding the private key, e.g. `PrK.CH.AUT.R2048`
    pub fn private_key_slot(&self, crypto: Crypto) -> String {
        format!(
            "PrK.{}.{}.{}",
            self.card_type.role(),
            self.cert_type.code(),
            crypto.code()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_table() {
        let egk_aut = CertificateProfile::from_policy_oid("1.2.276.0.76.4.70").unwrap();
        assert_eq!(egk_aut.card_type, CardType::Egk);
        assert_eq!(egk_aut.cert_type, CertType::Authentication);

        let smcb_osig = CertificateProfile::from_policy_oid("1.2.276.0.76.4.78").unwrap();
        assert_eq!(smcb_osig.card_type, CardType::SmcB);
        assert_eq!(smcb_osig.cert_type, CertType::OrganizationalSignature);

        // general gematik policy, names neither card nor purpose
        assert!(CertificateProfile::from_policy_oid("1.2.276.0.76.4.163").is_none());
    }

    #[test]
    fn test_slot_names() {
        let hba_qes = CertificateProfile::from_policy_oid("1.2.276.0.76.4.72").unwrap();
        assert_eq!(hba_qes.certificate_slot(Crypto::Ecc256), "EF.C.HP.QES.E256");
        assert_eq!(hba_qes.private_key_slot(Crypto::Rsa2048), "PrK.HP.QES.R2048");
    }

    #[test]
    fn test_crypto_from_signature_algorithm() {
        assert_eq!(
            Crypto::from_signature_algorithm("1.2.840.113549.1.1.11"),
            Some(Crypto::Rsa2048)
        );
        assert_eq!(
            Crypto::from_signature_algorithm("1.2.840.10045.4.3.2"),
            Some(Crypto::Ecc256)
        );
        // md5WithRSAEncryption and sha512-224/256WithRSAEncryption sit on the same arc
        for oid in ["1.2.840.113549.1.1.4", "1.2.840.113549.1.1.15", "1.2.840.113549.1.1.16"] {
            assert_eq!(Crypto::from_signature_algorithm(oid), Some(Crypto::Rsa2048));
        }
        assert_eq!(
            Crypto::from_signature_algorithm("1.2.840.10045.4.1"),
            Some(Crypto::Ecc256)
        );
        assert_eq!(Crypto::from_signature_algorithm("1.3.101.112"), None);
        // the arc itself and look-alike prefixes are not signature algorithms
        assert_eq!(Crypto::from_signature_algorithm("1.2.840.113549.1.1"), None);
        assert_eq!(Crypto::from_signature_algorithm("1.2.840.113549.1.10.1"), None);
        assert_eq!(Crypto::from_signature_algorithm("1.2.840.10045.41"), None);
    }

    #[test]
    fn test_card_type_names() {
        assert_eq!(CardType::SmcB.template_name(), "smc_b_template.xml");
        assert_eq!(CardType::SmcB.code(), "SMC-B");
        assert_eq!(
            serde_json::to_string(&CardType::Egk).unwrap(),
            r#""EGK""#
        );
    }
}

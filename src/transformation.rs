//! Card Image Transformation Module
//!
//! Writes the certificates and private keys of one physical card into the card image
//! template of its card type.
//!
//! # Field encoding
//!
//! Every value is written as uppercase hexadecimal of its big-endian bytes, so each
//! field has an even number of digits.
//!
//! - `EF.C.*` slots: `body` holds the DER certificate. `positionLogicalEndOfFile`
//!   holds the number of characters of that hex string, itself in hex and padded with
//!   a leading `0` to even length. The simulator expects exactly this encoding.
//! - `PrK.*` RSA slots: `n`, `e`, `d`, `p`, `q`, `dP`, `dQ` and the CRT coefficient `c`.
//! - `PrK.*` ECC slots: the private scalar in `privateKey` and the certificate's
//!   SubjectPublicKeyInfo in `P`.
//! - `EF.GDO` `body` becomes `5A0A` followed by the ICCSN; the root `iccsn8` attribute
//!   holds the ICCSN.

use crate::card_image::{CardImage, TemplateStore};
use crate::certificate_element::CertificateElement;
use crate::error::{Error, Result};
use crate::grouping::Card;
use openssl::bn::BigNumRef;
use openssl::ec::EcKeyRef;
use openssl::pkey::{Id, Private};
use openssl::rsa::RsaRef;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CARD_IMAGES_DIR: &str = "CardImages";

const EF_GDO: &str = "EF.GDO";
const GDO_PREFIX: &str = "5A0A";
const ICCSN8: &str = "iccsn8";
const BODY: &str = "body";
const POSITION_LOGICAL_END_OF_FILE: &str = "positionLogicalEndOfFile";

const RSA_N: &str = "n";
const RSA_E: &str = "e";
const RSA_D: &str = "d";
const RSA_P: &str = "p";
const RSA_Q: &str = "q";
const RSA_DP: &str = "dP";
const RSA_DQ: &str = "dQ";
const RSA_C: &str = "c";

const ELC_PRIVATE_KEY: &str = "privateKey";
const ELC_P: &str = "P";

/// Where the RSA CRT coefficient goes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CrtLayout {
    /// Every component in its own slot
    #[default]
    Distinct,
    /// Legacy simulator images: `c` is written with the coefficient and then overwritten
    /// with the prime `q`; the `q` slot is left as the template has it
    SharedCoefficientSlot,
}

/// Uppercase hex of `bytes`
pub fn hex_upper(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

fn bn_hex(value: &BigNumRef) -> String {
    hex_upper(&value.to_vec())
}

/// Hex length of `body_hex` in characters, padded to an even number of digits
pub fn logical_end_of_file(body_hex: &str) -> String {
    let length = format!("{:X}", body_hex.len());
    if length.len() % 2 == 1 {
        format!("0{length}")
    } else {
        length
    }
}

/// Encodes cards into their type-specific card image
pub struct CardImageTransformation<'a> {
    templates: &'a TemplateStore,
    crt_layout: CrtLayout,
}

impl<'a> CardImageTransformation<'a> {
    pub fn new(templates: &'a TemplateStore, crt_layout: CrtLayout) -> Self {
        Self {
            templates,
            crt_layout,
        }
    }

    /// File name of the image produced for `card`
    pub fn image_file_name(card: &Card<'_>) -> String {
        format!("{}.xml", card.file_stem())
    }

    /// Load the template of `card` and fill in all of its certificates and keys
    pub fn encode(&self, card: &Card<'_>) -> Result<CardImage> {
        let mut image = self.templates.load(&card.card_type.template_name())?;

        for element in &card.elements {
            write_certificate(&mut image, element)?;
            let key = element.private_key();
            match key.id() {
                Id::RSA => {
                    let rsa = key
                        .rsa()
                        .map_err(|e| Error::keystore(element.path(), e))?;
                    self.write_rsa_key(&mut image, element, &rsa)?;
                }
                Id::EC => {
                    let ec = key
                        .ec_key()
                        .map_err(|e| Error::keystore(element.path(), e))?;
                    write_ec_key(&mut image, element, &ec)?;
                }
                other => {
                    return Err(Error::keystore(
                        element.path(),
                        format!("unsupported private key type {:?}", other),
                    ))
                }
            }
        }

        if let Some(gdo) = image.element(EF_GDO) {
            image.set_attribute(gdo, BODY, format!("{GDO_PREFIX}{}", card.iccsn))?;
        }
        let root = image.root();
        image.set_attribute(root, ICCSN8, card.iccsn.as_str())?;

        Ok(image)
    }

    /// Encode `card` and save it below `output_root/CardImages`
    pub fn write(&self, card: &Card<'_>, output_root: &Path) -> Result<PathBuf> {
        info!(
            "Transform certificates to {} for {}",
            card.card_type.file_stem(),
            card.iccsn
        );
        let image = self.encode(card)?;
        let path = output_root
            .join(CARD_IMAGES_DIR)
            .join(Self::image_file_name(card));
        image.save(&path)?;
        Ok(path)
    }

    fn write_rsa_key(
        &self,
        image: &mut CardImage,
        element: &CertificateElement,
        rsa: &RsaRef<Private>,
    ) -> Result<()> {
        let slot = element.profile().private_key_slot(element.crypto());
        debug!("Transformation for RSA Private Key {}", slot);
        let Some(node) = image.element(&slot) else {
            return Ok(());
        };

        let crt = |value: Option<&BigNumRef>, name: &str| {
            value.map(bn_hex).ok_or_else(|| {
                Error::keystore(
                    element.path(),
                    format!("RSA key lacks CRT component {name}"),
                )
            })
        };
        let p = crt(rsa.p(), RSA_P)?;
        let q = crt(rsa.q(), RSA_Q)?;
        let dp = crt(rsa.dmp1(), RSA_DP)?;
        let dq = crt(rsa.dmq1(), RSA_DQ)?;
        let coefficient = crt(rsa.iqmp(), RSA_C)?;

        image.set_attribute(node, RSA_C, coefficient)?;
        image.set_attribute(node, RSA_D, bn_hex(rsa.d()))?;
        image.set_attribute(node, RSA_DP, dp)?;
        image.set_attribute(node, RSA_DQ, dq)?;
        image.set_attribute(node, RSA_E, bn_hex(rsa.e()))?;
        image.set_attribute(node, RSA_N, bn_hex(rsa.n()))?;
        image.set_attribute(node, RSA_P, p)?;
        match self.crt_layout {
            CrtLayout::Distinct => image.set_attribute(node, RSA_Q, q)?,
            CrtLayout::SharedCoefficientSlot => image.set_attribute(node, RSA_C, q)?,
        }
        Ok(())
    }
}

fn write_certificate(image: &mut CardImage, element: &CertificateElement) -> Result<()> {
    let slot = element.profile().certificate_slot(element.crypto());
    debug!("Transformation for Public Key {}", slot);
    let Some(node) = image.element(&slot) else {
        return Ok(());
    };

    let der = element
        .certificate()
        .to_der()
        .map_err(|e| Error::keystore(element.path(), e))?;
    let body = hex_upper(&der);
    let length = logical_end_of_file(&body);
    image.set_attribute(node, BODY, body)?;
    image.set_attribute(node, POSITION_LOGICAL_END_OF_FILE, length)
}

fn write_ec_key(
    image: &mut CardImage,
    element: &CertificateElement,
    ec: &EcKeyRef<Private>,
) -> Result<()> {
    let slot = element.profile().private_key_slot(element.crypto());
    debug!("Transformation for ECC Private Key {}", slot);
    let Some(node) = image.element(&slot) else {
        return Ok(());
    };

    let public_key = element
        .certificate()
        .public_key()
        .and_then(|key| key.public_key_to_der())
        .map_err(|e| Error::keystore(element.path(), e))?;
    image.set_attribute(node, ELC_PRIVATE_KEY, bn_hex(ec.private_key()))?;
    image.set_attribute(node, ELC_P, hex_upper(&public_key))
}

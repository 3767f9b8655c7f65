//! Groups certificate elements into physical cards
//!
//! One physical card carries several certificates (AUT, ENC, QES/OSIG, in RSA and ECC
//! flavours); the ICCSN ties them together.

use crate::card_types::CardType;
use crate::certificate_element::CertificateElement;
use std::collections::BTreeMap;
use tracing::warn;

/// Certificates of one physical card, in input order
#[derive(Debug, Clone)]
pub struct Card<'a> {
    pub card_type: CardType,
    pub iccsn: String,
    pub elements: Vec<&'a CertificateElement>,
}

impl Card<'_> {
    pub fn has_authentication(&self) -> bool {
        self.elements.iter().any(|element| element.is_authentication())
    }

    /// `{cardType}_{iccsn}`, the common stem of all files produced for this card
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.card_type.file_stem(), self.iccsn)
    }
}

/// Partition `entries` by ICCSN
///
/// The card type of a group is that of its first entry. Entries of one ICCSN are
/// expected to share their card type; a mismatch is logged, not corrected.
pub fn group(entries: &[CertificateElement]) -> BTreeMap<String, Card<'_>> {
    let mut cards: BTreeMap<String, Card<'_>> = BTreeMap::new();
    for element in entries {
        let card = cards
            .entry(element.iccsn().to_string())
            .or_insert_with(|| Card {
                card_type: element.card_type(),
                iccsn: element.iccsn().to_string(),
                elements: Vec::new(),
            });
        if card.card_type != element.card_type() {
            warn!(
                "ICCSN {} mixes card types {} and {} ({}); keeping {}",
                card.iccsn,
                card.card_type,
                element.card_type(),
                element.path().display(),
                card.card_type
            );
        }
        card.elements.push(element);
    }
    cards
}

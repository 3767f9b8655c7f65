//! Certificate expiry forecast
//!
//! Summarizes, per card, when its certificates run out and flags the ones that expire
//! inside a warning window of `months` × 30 days. The summary renders as a standalone
//! HTML page.

use crate::card_types::{CardType, CertType, Crypto};
use crate::certificate_element::CertificateElement;
use crate::error::{Error, Result};
use crate::grouping::group;
use maud::{html, Markup, PreEscaped, DOCTYPE};
use openssl::asn1::Asn1Time;
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const DAYS_PER_MONTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub crypto: Crypto,
    pub cert_type: CertType,
    pub not_after: String,
    pub expiring: bool,
}

impl CertificateSummary {
    fn css_class(&self) -> &'static str {
        if self.expiring {
            "expiring"
        } else {
            "valid"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSummary {
    pub card_type: CardType,
    pub iccsn: String,
    pub holder: Option<String>,
    pub certificates: Vec<CertificateSummary>,
}

impl CardSummary {
    pub fn is_expiring(&self) -> bool {
        self.certificates.iter().any(|certificate| certificate.expiring)
    }
}

#[derive(Debug, Clone)]
pub struct Forecast {
    pub months: u32,
    pub cards: Vec<CardSummary>,
}

impl Forecast {
    /// Summarize `entries`, ordered by card type and ICCSN
    pub fn new(entries: &[CertificateElement], months: u32) -> Result<Self> {
        let warn_date = Asn1Time::days_from_now(months.saturating_mul(DAYS_PER_MONTH))?;

        let mut cards = Vec::new();
        for (iccsn, card) in group(entries) {
            let mut elements = card.elements.clone();
            elements.sort_by_key(|element| (element.cert_type(), element.crypto()));

            let mut certificates = Vec::with_capacity(elements.len());
            for element in elements {
                let not_after = element.certificate().not_after();
                let expiring = not_after
                    .compare(&warn_date)
                    .map_err(|e| Error::keystore(element.path(), e))?
                    == Ordering::Less;
                if expiring {
                    warn!(
                        "{} {} {} certificate of {} expires {}",
                        card.card_type,
                        element.cert_type(),
                        element.crypto(),
                        iccsn,
                        not_after
                    );
                }
                certificates.push(CertificateSummary {
                    crypto: element.crypto(),
                    cert_type: element.cert_type(),
                    not_after: not_after.to_string(),
                    expiring,
                });
            }

            let holder = card
                .elements
                .iter()
                .find(|element| element.is_authentication())
                .or_else(|| card.elements.first())
                .and_then(|element| element.holder_name());

            cards.push(CardSummary {
                card_type: card.card_type,
                iccsn,
                holder,
                certificates,
            });
        }
        cards.sort_by(|a, b| (a.card_type, &a.iccsn).cmp(&(b.card_type, &b.iccsn)));

        Ok(Self { months, cards })
    }

    pub fn has_expiring(&self) -> bool {
        self.cards.iter().any(CardSummary::is_expiring)
    }

    pub fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            html lang="en" {
                head {
                    meta charset="utf-8";
                    title { "Smartcard Summary" }
                    style {
                        (PreEscaped(r#"
                            body { font-family: system-ui; max-width: 800px; margin: 50px auto;
                                   padding: 20px; color: #212529; }
                            h1 { color: #000000; font-weight: 600; margin-bottom: 20px; }
                            h3 { color: #000000; font-weight: 600; margin-top: 30px; }
                            table { border-collapse: collapse; width: 100%; }
                            th, td { border: 1px solid #495057; padding: 6px 10px;
                                     text-align: left; }
                            .expiring { background: #f8d7da; color: #842029; font-weight: 600; }
                            .valid { background: #d4edda; color: #0f5132; }
                        "#))
                    }
                }
                body {
                    h1 { "Smartcard Summary" }
                    p { "Forecast for " (self.months) " months (" (self.cards.len()) " cards)" }
                    @for card in &self.cards {
                        h3 {
                            (card.card_type) " " (card.iccsn)
                            @if let Some(holder) = &card.holder {
                                " (" (holder) ")"
                            }
                        }
                        table {
                            tr { th { "Crypto" } th { "Usage" } th { "Expiry" } }
                            @for certificate in &card.certificates {
                                tr {
                                    td { (certificate.crypto) }
                                    td { (certificate.cert_type) }
                                    td class=(certificate.css_class()) {
                                        (certificate.not_after)
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, self.render().into_string()).map_err(|e| Error::io(path, e))?;
        info!("Wrote forecast for {} cards to {}", self.cards.len(), path.display());
        Ok(())
    }
}

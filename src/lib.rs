//! Smartcard Image - Card Simulator Images from PKCS#12 Test Identities
//!
//! Turns a directory of single-entry PKCS#12 keystores (the test identities of patient
//! cards, health professional cards and institution cards) into the files a card
//! simulator loads:
//!
//! ```text
//! <destination>/
//!   CardImages/{egk,hba,smc_b}_{iccsn}.xml
//!   CardSimulationConfigurations/configuration_{egk,hba,smc_b}_{iccsn}.xml
//!   images.json
//! ```
//!
//! # Overview
//!
//! Every keystore becomes a [`certificate_element::CertificateElement`]: its certificate
//! is classified by certificate-policy OID into a card type (EGK, HBA, SMC-B) and a
//! purpose (AUT, ENC, QES, OSIG), and the ICCSN of the card it belongs to is derived from
//! the file name or the subject. Elements sharing an ICCSN form one card
//! ([`grouping`]). Each card is written into the XML image template of its type
//! ([`transformation`]) and gets a simulation configuration ([`card_configuration`]).
//! The manifest ([`manifest`]) lists every card that owns an authentication certificate.
//!
//! # Example
//!
//! ```no_run
//! use smartcard_image::configs::AppConfig;
//! use smartcard_image::pipeline::Transformer;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let report = Transformer::new(config)?.run("keystores", "simulator")?;
//!     for (iccsn, error) in &report.failed {
//!         eprintln!("{}: {}", iccsn, error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`card_types`]: card types, purposes, crypto families and the OID table
//! - [`certificate_element`]: keystore extraction and certificate classification
//! - [`card_image`]: XML template documents and their lookup primitives
//! - [`pipeline`]: the batch transformation
//! - [`forecast`]: certificate expiry report

pub mod card_configuration;
pub mod card_image;
pub mod card_types;
pub mod certificate_element;
pub mod configs;
pub mod error;
pub mod forecast;
pub mod grouping;
pub mod manifest;
pub mod pipeline;
pub mod transformation;

#[cfg(test)]
mod test_support;

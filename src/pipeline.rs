//! Batch Transformation Pipeline
//!
//! Ties the stages together for one source directory:
//!
//! 1. read every `.p12` keystore below the source (any failure aborts the batch)
//! 2. write `images.json`
//! 3. group the entries by ICCSN and write a card image and a simulation configuration
//!    for every card
//!
//! Template problems in step 3 only cost the affected card; they are collected in the
//! [`TransformReport`] while the remaining cards are still written.
//!
//! # Example
//!
//! ```no_run
//! use smartcard_image::configs::AppConfig;
//! use smartcard_image::pipeline::Transformer;
//!
//! let report = Transformer::new(AppConfig::default())?.run("keystores", "simulator")?;
//! println!("{} images written", report.images.len());
//! # Ok::<(), smartcard_image::error::Error>(())
//! ```

use crate::card_configuration::CardConfiguration;
use crate::card_image::TemplateStore;
use crate::certificate_element::KeystoreReader;
use crate::configs::AppConfig;
use crate::error::{Error, Result};
use crate::forecast::Forecast;
use crate::grouping::group;
use crate::manifest;
use crate::transformation::{CardImageTransformation, CrtLayout};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Outcome of one [`Transformer::run`]
#[derive(Debug, Default)]
pub struct TransformReport {
    /// Number of keystores read
    pub keystores: usize,
    /// Card images whose configuration was written as well
    pub images: Vec<PathBuf>,
    pub configurations: Vec<PathBuf>,
    pub manifest: PathBuf,
    /// ICCSNs whose card could not be written, with the reason
    pub failed: Vec<(String, Error)>,
}

impl TransformReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Transformer {
    config: AppConfig,
    templates: TemplateStore,
    reader: KeystoreReader,
}

impl Transformer {
    /// # Errors
    /// [`Error::Config`] when a configured template directory does not exist
    pub fn new(config: AppConfig) -> Result<Self> {
        if let Some(directory) = &config.templates.directory {
            if !directory.is_dir() {
                return Err(Error::Config(format!(
                    "template directory {} does not exist",
                    directory.display()
                )));
            }
        }
        let templates = TemplateStore::new(config.templates.directory.clone());
        let reader = KeystoreReader::new(config.keystore.password.clone());
        Ok(Self {
            config,
            templates,
            reader,
        })
    }

    fn crt_layout(&self) -> CrtLayout {
        if self.config.compat.duplicate_crt_slot {
            CrtLayout::SharedCoefficientSlot
        } else {
            CrtLayout::Distinct
        }
    }

    /// Transform every keystore below `source` into simulator files below `destination`
    pub fn run<S: AsRef<Path>, D: AsRef<Path>>(
        &self,
        source: S,
        destination: D,
    ) -> Result<TransformReport> {
        let source = source.as_ref();
        let destination = destination.as_ref();

        let entries = self.reader.scan(source)?;
        info!(
            "Read {} keystores from {}",
            entries.len(),
            source.display()
        );

        let anchor = self
            .config
            .output
            .manifest_anchor
            .as_deref()
            .unwrap_or(destination);
        let mut report = TransformReport {
            keystores: entries.len(),
            manifest: manifest::write(&entries, anchor, destination)?,
            ..Default::default()
        };

        let transformation = CardImageTransformation::new(&self.templates, self.crt_layout());
        let configuration = CardConfiguration::new(
            &self.templates,
            self.config.output.channel_context_file.as_str(),
        );

        for (iccsn, card) in group(&entries) {
            let image = match transformation.write(&card, destination) {
                Ok(image) => image,
                Err(e @ Error::Template { .. }) => {
                    error!("Card image for {} failed: {}", iccsn, e);
                    report.failed.push((iccsn, e));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let image_file_name = CardImageTransformation::image_file_name(&card);
            match configuration.write(&card, &image_file_name, destination) {
                Ok(path) => {
                    report.configurations.push(path);
                    report.images.push(image);
                }
                Err(e @ Error::Template { .. }) => {
                    error!("Configuration for {} failed: {}", iccsn, e);
                    report.failed.push((iccsn, e));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Wrote {} card images, {} failed",
            report.images.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Expiry forecast for every keystore below `source`
    pub fn forecast<S: AsRef<Path>>(&self, source: S, months: u32) -> Result<Forecast> {
        let entries = self.reader.scan(source.as_ref())?;
        Forecast::new(&entries, months)
    }
}

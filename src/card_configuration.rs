//! Card simulation configuration files
//!
//! Each card image needs a configuration that points the simulator at it. The template's
//! `cardImageFile` value is a path prefix the image file name is appended to.

use crate::card_image::{TemplateStore, CONFIGURATION_TEMPLATE};
use crate::error::Result;
use crate::grouping::Card;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIGURATIONS_DIR: &str = "CardSimulationConfigurations";

const CARD_IMAGE_FILE: &str = "cardImageFile";
const CHANNEL_CONTEXT_FILE: &str = "channelContextFile";

pub struct CardConfiguration<'a> {
    templates: &'a TemplateStore,
    channel_context_file: String,
}

impl<'a> CardConfiguration<'a> {
    pub fn new(templates: &'a TemplateStore, channel_context_file: impl Into<String>) -> Self {
        Self {
            templates,
            channel_context_file: channel_context_file.into(),
        }
    }

    pub fn file_name(card: &Card<'_>) -> String {
        format!("configuration_{}.xml", card.file_stem())
    }

    /// Write the configuration for `card`, referencing `image_file_name`
    pub fn write(
        &self,
        card: &Card<'_>,
        image_file_name: &str,
        output_root: &Path,
    ) -> Result<PathBuf> {
        let mut configuration = self.templates.load(CONFIGURATION_TEMPLATE)?;
        let root = configuration.root();

        let image_file = format!(
            "{}{}",
            configuration.attribute_value(root, CARD_IMAGE_FILE)?,
            image_file_name
        );
        configuration.set_attribute(root, CARD_IMAGE_FILE, image_file)?;
        configuration.set_attribute(
            root,
            CHANNEL_CONTEXT_FILE,
            self.channel_context_file.as_str(),
        )?;

        let path = output_root
            .join(CONFIGURATIONS_DIR)
            .join(Self::file_name(card));
        configuration.save(&path)?;
        info!(
            "Wrote simulation configuration for {} to {}",
            card.iccsn,
            path.display()
        );
        Ok(path)
    }
}

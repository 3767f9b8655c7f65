//! Card Image Template Module
//!
//! An XML template addressed through two primitives:
//!
//! - [`CardImage::element`] finds the element whose `id` attribute equals a slot name.
//!   A missing element is not an error: templates only define the slots their card type
//!   actually has, so the lookup logs a warning and yields `None`.
//! - [`CardImage::attribute`] finds, inside the `attributes` collection of an element, the
//!   entry whose `id` equals an attribute name. A missing attribute is a hard error.
//!
//! ```text
//! <cardImage id="EGK">
//!   <attributes>
//!     <attribute id="iccsn8"/>            <- attribute(root, "iccsn8")
//!   </attributes>
//!   <children>
//!     <child id="EF.GDO">                 <- element("EF.GDO")
//!       <attributes>
//!         <attribute id="body"/>          <- attribute(ef_gdo, "body")
//!       </attributes>
//!     </child>
//!   </children>
//! </cardImage>
//! ```
//!
//! Ids are indexed once at load time, so lookups do not walk the tree.

use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ID: &str = "id";
const ATTRIBUTES: &str = "attributes";

pub const CONFIGURATION_TEMPLATE: &str = "card_configuration_template.xml";

/// Handle to an element of a [`CardImage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<usize>,
}

impl Node {
    fn new(start: &BytesStart<'_>) -> std::result::Result<Self, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            attrs.push((key, value.into_owned()));
        }
        Ok(Self {
            name,
            attrs,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn id(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == ID)
            .map(|(_, value)| value.as_str())
    }
}

/// Mutable in-memory XML tree of a card image or configuration template
#[derive(Debug, Clone)]
pub struct CardImage {
    name: String,
    nodes: Vec<Node>,
    elements: HashMap<String, usize>,
}

impl CardImage {
    /// Parse a template; `name` is only used for diagnostics
    pub fn parse(name: &str, xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();
        let mut root: Option<usize> = None;

        let mut open = |nodes: &mut Vec<Node>, stack: &[usize], node: Node| -> Result<usize> {
            let index = nodes.len();
            nodes.push(node);
            match stack.last() {
                Some(&parent) => nodes[parent].children.push(index),
                None if root.is_none() => root = Some(index),
                None => return Err(Error::template(name, "more than one root element")),
            }
            Ok(index)
        };

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => {
                    let node = Node::new(&start).map_err(|e| Error::template(name, e))?;
                    let index = open(&mut nodes, &stack, node)?;
                    stack.push(index);
                }
                Ok(Event::Empty(start)) => {
                    let node = Node::new(&start).map_err(|e| Error::template(name, e))?;
                    open(&mut nodes, &stack, node)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(text)) => {
                    if let Some(&current) = stack.last() {
                        let text = text.unescape().map_err(|e| Error::template(name, e))?;
                        nodes[current].text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(&current) = stack.last() {
                        nodes[current]
                            .text
                            .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                // declarations, comments and processing instructions are not kept
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::template(
                        name,
                        format!("malformed XML at {}: {}", reader.buffer_position(), e),
                    ))
                }
            }
        }

        match root {
            Some(0) => {}
            _ => return Err(Error::template(name, "template has no root element")),
        }

        let mut image = Self {
            name: name.to_string(),
            nodes,
            elements: HashMap::new(),
        };
        image.index_elements(0, false);
        Ok(image)
    }

    /// Load and parse a template file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&path.display().to_string(), &xml)
    }

    fn index_elements(&mut self, index: usize, in_attributes: bool) {
        let node = &self.nodes[index];
        let is_collection = node.name == ATTRIBUTES;
        if !in_attributes && !is_collection {
            if let Some(id) = node.id() {
                if self.elements.contains_key(id) {
                    warn!("Template {} defines slot {} more than once", self.name, id);
                } else {
                    self.elements.insert(id.to_string(), index);
                }
            }
        }
        let children = node.children.clone();
        for child in children {
            self.index_elements(child, in_attributes || is_collection);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Find the element whose `id` equals `id`, logging a warning when it is absent
    pub fn element(&self, id: &str) -> Option<NodeId> {
        let found = self.elements.get(id).copied().map(NodeId);
        if found.is_none() {
            warn!("Template {} has no element {}", self.name, id);
        }
        found
    }

    /// Find the attribute entry `id` of `element`
    pub fn attribute(&self, element: NodeId, id: &str) -> Result<NodeId> {
        let owner = &self.nodes[element.0];
        owner
            .children
            .iter()
            .map(|&child| &self.nodes[child])
            .filter(|node| node.name == ATTRIBUTES)
            .flat_map(|collection| collection.children.iter().copied())
            .find(|&entry| self.nodes[entry].id() == Some(id))
            .map(NodeId)
            .ok_or_else(|| {
                Error::template(
                    &self.name,
                    format!(
                        "element {} has no attribute {}",
                        owner.id().unwrap_or(&owner.name),
                        id
                    ),
                )
            })
    }

    pub fn text(&self, node: NodeId) -> &str {
        &self.nodes[node.0].text
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        self.nodes[node.0].text = text.into();
    }

    /// Replace the value of attribute `id` of `element`
    pub fn set_attribute(
        &mut self,
        element: NodeId,
        id: &str,
        value: impl Into<String>,
    ) -> Result<()> {
        let attribute = self.attribute(element, id)?;
        self.set_text(attribute, value);
        Ok(())
    }

    /// Value of attribute `id` of `element`
    pub fn attribute_value(&self, element: NodeId, id: &str) -> Result<&str> {
        Ok(self.text(self.attribute(element, id)?))
    }

    /// Serialize the tree, indented by two spaces
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Error::template(&self.name, e))?;
        self.write_node(&mut writer, 0)?;
        String::from_utf8(writer.into_inner()).map_err(|e| Error::template(&self.name, e))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, index: usize) -> Result<()> {
        let node = &self.nodes[index];
        let mut start = BytesStart::new(node.name.as_str());
        for (key, value) in &node.attrs {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if node.children.is_empty() && node.text.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| Error::template(&self.name, e));
        }

        writer
            .write_event(Event::Start(start))
            .map_err(|e| Error::template(&self.name, e))?;
        if !node.text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&node.text)))
                .map_err(|e| Error::template(&self.name, e))?;
        }
        for &child in &node.children {
            self.write_node(writer, child)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(node.name.as_str())))
            .map_err(|e| Error::template(&self.name, e))
    }

    /// Write the tree to `path`, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, self.to_xml()?).map_err(|e| Error::io(path, e))?;
        debug!("Saved {} to {}", self.name, path.display());
        Ok(())
    }
}

/// Source of template documents: an optional override directory in front of the
/// templates compiled into the binary
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    directory: Option<PathBuf>,
}

impl TemplateStore {
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self { directory }
    }

    fn builtin(name: &str) -> Option<&'static str> {
        match name {
            "egk_template.xml" => Some(include_str!("../resources/egk_template.xml")),
            "hba_template.xml" => Some(include_str!("../resources/hba_template.xml")),
            "smc_b_template.xml" => Some(include_str!("../resources/smc_b_template.xml")),
            CONFIGURATION_TEMPLATE => {
                Some(include_str!("../resources/card_configuration_template.xml"))
            }
            _ => None,
        }
    }

    /// Load a fresh copy of the template `name`
    pub fn load(&self, name: &str) -> Result<CardImage> {
        if let Some(directory) = &self.directory {
            let candidate = directory.join(name);
            if candidate.is_file() {
                debug!("Loading template {} from {}", name, candidate.display());
                let xml = fs::read_to_string(&candidate).map_err(|e| Error::io(&candidate, e))?;
                return CardImage::parse(name, &xml);
            }
        }
        let xml = Self::builtin(name)
            .ok_or_else(|| Error::template(name, "no such template resource"))?;
        CardImage::parse(name, xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- sample -->
<cardImage id="SAMPLE">
  <attributes>
    <attribute id="iccsn8">0</attribute>
  </attributes>
  <children>
    <child id="EF.GDO">
      <attributes>
        <attribute id="body"/>
        <attribute id="shareable">true</attribute>
      </attributes>
    </child>
    <folder id="DF.ESIGN">
      <children>
        <child id="EF.C.CH.AUT.E256">
          <attributes>
            <attribute id="body"></attribute>
            <attribute id="positionLogicalEndOfFile">00</attribute>
          </attributes>
        </child>
      </children>
    </folder>
  </children>
</cardImage>
"#;

    #[test]
    fn test_element_lookup() {
        let image = CardImage::parse("sample", SAMPLE).unwrap();
        assert!(image.element("EF.GDO").is_some());
        assert!(image.element("EF.C.CH.AUT.E256").is_some());
        assert!(image.element("EF.C.CH.ENC.R2048").is_none());
        // attribute entries are not elements even though they carry an id
        assert!(image.element("body").is_none());
    }

    #[test]
    fn test_attribute_lookup() {
        let image = CardImage::parse("sample", SAMPLE).unwrap();
        let gdo = image.element("EF.GDO").unwrap();
        assert_eq!(image.attribute_value(gdo, "shareable").unwrap(), "true");
        assert_eq!(image.attribute_value(image.root(), "iccsn8").unwrap(), "0");

        let missing = image.attribute(gdo, "positionLogicalEndOfFile");
        assert!(matches!(missing, Err(Error::Template { .. })));
    }

    #[test]
    fn test_mutation_survives_serialization() {
        let mut image = CardImage::parse("sample", SAMPLE).unwrap();
        let gdo = image.element("EF.GDO").unwrap();
        image.set_attribute(gdo, "body", "5A0A01").unwrap();
        let root = image.root();
        image.set_attribute(root, "iccsn8", "a<b").unwrap();

        let xml = image.to_xml().unwrap();
        assert!(xml.contains("a&lt;b"));

        let reparsed = CardImage::parse("reparsed", &xml).unwrap();
        let gdo = reparsed.element("EF.GDO").unwrap();
        assert_eq!(reparsed.attribute_value(gdo, "body").unwrap(), "5A0A01");
        assert_eq!(
            reparsed.attribute_value(reparsed.root(), "iccsn8").unwrap(),
            "a<b"
        );
    }

    #[test]
    fn test_malformed_template() {
        assert!(CardImage::parse("broken", "<cardImage><child></cardImage>").is_err());
        assert!(CardImage::parse("empty", "").is_err());
    }

    #[test]
    fn test_builtin_templates_parse() {
        let store = TemplateStore::default();
        for name in ["egk_template.xml", "hba_template.xml", "smc_b_template.xml"] {
            let image = store.load(name).unwrap();
            assert!(image.attribute(image.root(), "iccsn8").is_ok());
            assert!(image.element("EF.GDO").is_some());
        }
        let configuration = store.load(CONFIGURATION_TEMPLATE).unwrap();
        assert!(configuration
            .attribute(configuration.root(), "cardImageFile")
            .is_ok());
        assert!(store.load("unknown_template.xml").is_err());
    }

    #[test]
    fn test_directory_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("egk_template.xml"), SAMPLE).unwrap();
        let store = TemplateStore::new(Some(dir.path().to_path_buf()));

        let image = store.load("egk_template.xml").unwrap();
        assert!(image.element("DF.ESIGN").is_some());
        // falls back to the built-in template
        assert!(store.load("hba_template.xml").is_ok());
    }
}

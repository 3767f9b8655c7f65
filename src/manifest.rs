//! Image manifest (`images.json`)
//!
//! Lists every card that can identify itself, i.e. every ICCSN group holding at least one
//! AUT certificate, together with the keystores it was built from:
//!
//! ```json
//! [
//!   {
//!     "iccsn": "80276883110000113311",
//!     "type": "EGK",
//!     "name": "Hillbert Heinz",
//!     "kvnr": "X110406067",
//!     "keys": ["keystores/80276883110000113311-C_CH_AUT_R2048.p12"]
//!   }
//! ]
//! ```

use crate::card_types::CardType;
use crate::certificate_element::CertificateElement;
use crate::error::{Error, Result};
use crate::grouping::group;
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

pub const MANIFEST_FILE: &str = "images.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    pub iccsn: String,
    #[serde(rename = "type")]
    pub card_type: CardType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kvnr: Option<String>,
    pub keys: Vec<String>,
}

/// Build the manifest entries for `entries`, ordered by ICCSN
pub fn entries(all: &[CertificateElement], anchor: &Path) -> Result<Vec<ImageEntry>> {
    let mut images = Vec::new();
    for (iccsn, card) in group(all) {
        let Some(authentication) = card.elements.iter().find(|e| e.is_authentication()) else {
            info!("Skipping ICCSN {}: no AUT certificate", iccsn);
            continue;
        };

        let kvnr = match card.card_type {
            CardType::Egk => match authentication.health_insurance_id() {
                Ok(kvnr) => Some(kvnr),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
            CardType::Hba | CardType::SmcB => None,
        };

        let keys = card
            .elements
            .iter()
            .map(|element| relative_path(element.path(), anchor))
            .collect::<Result<Vec<_>>>()?;

        images.push(ImageEntry {
            iccsn,
            card_type: card.card_type,
            name: authentication.holder_name(),
            kvnr,
            keys,
        });
    }
    Ok(images)
}

/// Write `images.json` into `output_root`
pub fn write(all: &[CertificateElement], anchor: &Path, output_root: &Path) -> Result<PathBuf> {
    let images = entries(all, anchor)?;
    fs::create_dir_all(output_root).map_err(|e| Error::io(output_root, e))?;
    let path = output_root.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&images)?;
    fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
    info!("Wrote {} card(s) to {}", images.len(), path.display());
    Ok(path)
}

/// `path` relative to `anchor`, with `/` separators
fn relative_path(path: &Path, anchor: &Path) -> Result<String> {
    let path = std::path::absolute(path).map_err(|e| Error::io(path, e))?;
    let anchor = std::path::absolute(anchor).map_err(|e| Error::io(anchor, e))?;
    let path = normalize(&path);
    let anchor = normalize(&anchor);

    let common = path
        .iter()
        .zip(anchor.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    parts.extend(std::iter::repeat("..".to_string()).take(anchor.len() - common));
    parts.extend(
        path[common..]
            .iter()
            .map(|part| part.to_string_lossy().into_owned()),
    );
    Ok(parts.join("/"))
}

/// Components of an absolute path with `.` and `..` resolved lexically
fn normalize(path: &Path) -> Vec<std::ffi::OsString> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => parts.push(prefix.as_os_str().to_os_string()),
            Component::RootDir => parts.push(std::ffi::OsString::from("/")),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_element::KeystoreReader;
    use crate::test_support::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/a/b/keys/1-aut.p12"), Path::new("/a/b")).unwrap(),
            "keys/1-aut.p12"
        );
        assert_eq!(
            relative_path(Path::new("/a/keys/1-aut.p12"), Path::new("/a/b/out")).unwrap(),
            "../../keys/1-aut.p12"
        );
        assert_eq!(
            relative_path(Path::new("/a/./keys/../keys/1.p12"), Path::new("/a/")).unwrap(),
            "keys/1.p12"
        );
    }

    #[test]
    fn test_patient_card_entry() {
        let dir = tempfile::tempdir().unwrap();
        IdentityBuilder::egk_aut()
            .write_p12(dir.path(), &format!("keystores/{ICCSN}-C_CH_AUT_R2048.p12"));
        let all = KeystoreReader::new(PASSWORD).scan(dir.path()).unwrap();

        let images = entries(&all, dir.path()).unwrap();
        assert_eq!(
            images,
            vec![ImageEntry {
                iccsn: ICCSN.to_string(),
                card_type: CardType::Egk,
                name: Some("Hillbert Heinz".to_string()),
                kvnr: Some(KVNR.to_string()),
                keys: vec![format!("keystores/{ICCSN}-C_CH_AUT_R2048.p12")],
            }]
        );
    }

    #[test]
    fn test_shared_iccsn_lists_both_keystores() {
        let dir = tempfile::tempdir().unwrap();
        IdentityBuilder::egk_aut().write_p12(dir.path(), &format!("{ICCSN}-aut.p12"));
        IdentityBuilder::new(EGK_ENC).write_p12(dir.path(), &format!("{ICCSN}-enc.p12"));
        // no AUT certificate, excluded
        IdentityBuilder::new(EGK_ENC).write_p12(dir.path(), "80276883110000000001-enc.p12");
        let all = KeystoreReader::new(PASSWORD).scan(dir.path()).unwrap();
        assert_eq!(all.len(), 3);

        let images = entries(&all, dir.path()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].iccsn, ICCSN);
        assert_eq!(
            images[0].keys,
            vec![format!("{ICCSN}-aut.p12"), format!("{ICCSN}-enc.p12")]
        );
    }

    #[test]
    fn test_type_follows_card_grouping() {
        let dir = tempfile::tempdir().unwrap();
        // paths sort "33-a" before "33-b", so the group is an HBA
        IdentityBuilder::new(HBA_QES).write_p12(dir.path(), "33-a.p12");
        IdentityBuilder::egk_aut().write_p12(dir.path(), "33-b.p12");
        let all = KeystoreReader::new(PASSWORD).scan(dir.path()).unwrap();

        let images = entries(&all, dir.path()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].card_type, group(&all)["33"].card_type);
        assert_eq!(images[0].card_type, CardType::Hba);
        assert_eq!(images[0].kvnr, None);
        assert_eq!(images[0].name.as_deref(), Some("Hillbert Heinz"));
    }

    #[test]
    fn test_write_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        IdentityBuilder::new(SMCB_AUT)
            .ec()
            .write_p12(dir.path(), "keys/80276883110000095767-aut.p12");
        let all = KeystoreReader::new(PASSWORD).scan(dir.path().join("keys")).unwrap();

        let path = write(&all, &out, &out).unwrap();
        assert_eq!(path, out.join(MANIFEST_FILE));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let card = &json.as_array().unwrap()[0];
        assert_eq!(card["iccsn"], "80276883110000095767");
        assert_eq!(card["type"], "SMC-B");
        assert!(card.get("name").is_none());
        assert!(card.get("kvnr").is_none());
        assert_eq!(card["keys"][0], "../keys/80276883110000095767-aut.p12");
    }
}

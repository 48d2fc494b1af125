//! In-memory book representation and the persisted workspace metadata.
//!
//! [`Book`] is what the container reader produces and the writer consumes:
//! manifest-level metadata, reading order, table of contents, and the raw
//! bytes of every manifest item. [`WorkspaceMeta`] is the `metadata.json`
//! record an extracted workspace carries between `extract` and `build`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const METADATA_FILE: &str = "metadata.json";

/// An ebook loaded from (or destined for) an EPUB container.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub metadata: Metadata,
    pub spine: Vec<SpineItem>,
    pub toc: Vec<TocEntry>,
    /// Manifest items in document order, with their content.
    pub items: Vec<Item>,
}

/// Manifest-level Dublin Core facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub identifier: String,
    pub title: String,
    pub language: String,
    pub authors: Vec<String>,
}

/// One entry in the reading order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpineItem {
    pub idref: String,
    #[serde(default = "default_true")]
    pub linear: bool,
}

fn default_true() -> bool {
    true
}

/// A table of contents entry (hierarchical).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
        }
    }
}

/// A manifest item with its content.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub href: String,
    pub media_type: String,
    /// Manifest `properties` attribute (EPUB 3), e.g. `nav`.
    pub properties: Option<String>,
    pub data: Vec<u8>,
}

impl Item {
    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_ascii_whitespace().any(|x| x == property))
    }
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(
        &mut self,
        id: impl Into<String>,
        href: impl Into<String>,
        media_type: impl Into<String>,
        data: Vec<u8>,
    ) {
        self.items.push(Item {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
            data,
        });
    }

    pub fn item_by_id(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_by_href(&self, href: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.href == href)
    }
}

/// Where an extracted item lands in the workspace tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Text,
    Images,
    Styles,
    Misc,
}

impl Category {
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            "application/xhtml+xml" | "text/html" => Category::Text,
            "text/css" => Category::Styles,
            mt if mt.starts_with("image/") => Category::Images,
            _ => Category::Misc,
        }
    }

    /// Workspace directory this category is stored under.
    pub fn dir(self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Images => "images",
            Category::Styles => "styles",
            Category::Misc => "misc",
        }
    }
}

/// Record of one extracted manifest item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub category: Category,
    /// Path of the primary artifact, relative to the workspace root. For a
    /// decoded chapter this is the plain-text file; for everything else the
    /// verbatim asset copy.
    pub relative_path: String,
    /// Sidecar JSON path for decoded chapters. Absent for assets and for
    /// chapters whose markup could not be decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_path: Option<String>,
    /// Original chapter markup, kept for human reference only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,
}

impl ItemRecord {
    /// True when this record is a chapter with a decoded text + sidecar pair.
    pub fn is_decoded_chapter(&self) -> bool {
        self.category == Category::Text && self.sidecar_path.is_some()
    }
}

/// The book-level `metadata.json` of an extracted workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub identifier: String,
    pub title: String,
    pub language: String,
    pub authors: Vec<String>,
    pub spine: Vec<SpineItem>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    pub items: Vec<ItemRecord>,
}

impl WorkspaceMeta {
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(Error::MissingMetadata(path));
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(METADATA_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn record_by_id(&self, id: &str) -> Option<&ItemRecord> {
        self.items.iter().find(|r| r.id == id)
    }
}

//! Chapter model: plain-text body lines plus the placeholder sidecar.
//!
//! A decoded chapter is a list of lines where line 0 is the title and line 1
//! is a mandatory blank separator. Non-text fragments from the original
//! markup (images, vector graphics, text-free cross references) appear as
//! marker lines like `[[BLOCK-0001]]`, each backed by exactly one
//! [`Placeholder`] record in the sidecar.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind tag for a non-text fragment lifted out of chapter markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    /// A raster image (`img`, `object`).
    Image,
    /// An embedded vector graphic (`svg` wrapping an `image`).
    Vector,
    /// A text-free link to another document (`a`, `iframe`).
    CrossRef,
}

/// A non-text fragment extracted from chapter markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// The marker line in the body text this record backs.
    pub marker: String,
    pub kind: PlaceholderKind,
    /// Reference path: image source or link target.
    pub src: String,
    /// Alternate text / link label as found in the source. May be empty;
    /// the encoder substitutes a non-empty fallback.
    #[serde(default)]
    pub alt: String,
}

/// One chapter, decoded to editable text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterDoc {
    pub title: String,
    /// Per-chapter language, if the source markup declared one.
    pub language: Option<String>,
    pub body_lines: Vec<String>,
    pub placeholders: Vec<Placeholder>,
}

/// The persisted sidecar: everything about a chapter except its body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub placeholders: Vec<Placeholder>,
    /// Workspace-relative path of the retained original markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,
}

/// Render a marker for the `index`-th placeholder of a chapter (1-based).
pub fn marker_for(index: usize) -> String {
    format!("[[BLOCK-{:04}]]", index)
}

/// If `line` consists of a single marker (allowing surrounding whitespace),
/// return the marker itself.
pub fn parse_marker(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix("[[BLOCK-")?.strip_suffix("]]")?;
    if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
        Some(trimmed)
    } else {
        None
    }
}

impl ChapterDoc {
    /// Rebuild a chapter from its text file content and sidecar.
    pub fn from_text(text: &str, sidecar: &Sidecar) -> Self {
        let body_lines: Vec<String> = text.lines().map(str::to_string).collect();
        ChapterDoc {
            title: sidecar.title.clone(),
            language: sidecar.language.clone(),
            body_lines,
            placeholders: sidecar.placeholders.clone(),
        }
    }

    /// The body as a single text blob, one trailing newline.
    pub fn text(&self) -> String {
        let mut out = self.body_lines.join("\n");
        out.push('\n');
        out
    }

    pub fn sidecar(&self, raw_path: Option<String>) -> Sidecar {
        Sidecar {
            title: self.title.clone(),
            language: self.language.clone(),
            placeholders: self.placeholders.clone(),
            raw_path,
        }
    }

    /// Marker lines in body order.
    pub fn markers(&self) -> Vec<&str> {
        self.body_lines
            .iter()
            .filter_map(|l| parse_marker(l))
            .collect()
    }

    /// Check the marker/sidecar contract: every marker line resolves to
    /// exactly one placeholder and no marker appears twice. Unreferenced
    /// placeholders are allowed here; the encoder drops them silently.
    pub fn verify_markers(&self, href: &str) -> Result<()> {
        let mut declared = HashSet::new();
        for p in &self.placeholders {
            if !declared.insert(p.marker.as_str()) {
                return Err(Error::DuplicateMarker {
                    href: href.to_string(),
                    marker: p.marker.clone(),
                });
            }
        }
        let mut seen = HashSet::new();
        for marker in self.markers() {
            if !declared.contains(marker) {
                return Err(Error::DanglingMarker {
                    href: href.to_string(),
                    marker: marker.to_string(),
                });
            }
            if !seen.insert(marker) {
                return Err(Error::DuplicateMarker {
                    href: href.to_string(),
                    marker: marker.to_string(),
                });
            }
        }
        Ok(())
    }
}

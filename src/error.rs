//! Error types for unbind operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while extracting or rebuilding a book.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Malformed chapter {href}: {reason}")]
    MalformedChapter { href: String, reason: String },

    #[error("Marker {marker} in chapter {href} has no matching sidecar entry")]
    DanglingMarker { href: String, marker: String },

    #[error("Duplicate marker {marker} in chapter {href}")]
    DuplicateMarker { href: String, marker: String },

    #[error("Spine references unknown item: {0}")]
    UnknownSpineEntry(String),

    #[error("Destination {0} exists and is not empty (pass force to clear it)")]
    DestinationNotEmpty(PathBuf),

    #[error("Metadata file not found: {0}")]
    MissingMetadata(PathBuf),

    #[error("Missing asset for {href}: {path}")]
    MissingAsset { href: String, path: PathBuf },

    #[error("Validator {command} failed with exit code {code}")]
    Validator { command: String, code: i32 },
}

pub type Result<T> = std::result::Result<T, Error>;

//! unbind converts EPUB files into editable plain-text workspaces and back.
//!
//! An extracted workspace holds one text file per chapter, a JSON sidecar
//! describing the non-text fragments lifted out of it, and the book's
//! assets and metadata. Edit or translate the text files, then rebuild a
//! valid EPUB; a translations directory with `*_translated.txt` files is
//! merged line by line, and chapters whose translation does not line up
//! fall back to the original text instead of failing the build.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use unbind::{BuildOptions, ExtractOptions, build, extract};
//!
//! fn main() -> unbind::Result<()> {
//!     let workspace = Path::new("book_workspace");
//!     extract(Path::new("book.epub"), workspace, &ExtractOptions::default())?;
//!     // ... edit workspace/text/*.txt ...
//!     build(workspace, Path::new("book_rebuilt.epub"), &BuildOptions::default())?;
//!     Ok(())
//! }
//! ```

mod assemble;
mod book;
mod chapter;
mod codec;
mod epub;
mod error;
mod extract;
mod translate;
pub(crate) mod util;

pub use assemble::{BuildOptions, BuildReport, MetadataOverrides, build};
pub use book::{
    Book, Category, Item, ItemRecord, Metadata, SpineItem, TocEntry, WorkspaceMeta,
};
pub use chapter::{ChapterDoc, Placeholder, PlaceholderKind, Sidecar};
pub use codec::{decode, encode};
pub use epub::{read_epub, write_epub};
pub use error::{Error, Result};
pub use extract::{ChapterFailure, ExtractOptions, ExtractReport, extract};
pub use translate::{TranslationWarning, merge_lines, translation_file_name};

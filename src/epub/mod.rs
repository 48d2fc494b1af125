//! EPUB container collaborator: zip archive in, zip archive out.

mod reader;
mod writer;

pub use reader::{read_epub, read_epub_from_reader};
pub use writer::{write_epub, write_epub_to_writer};

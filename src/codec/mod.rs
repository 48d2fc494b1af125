//! The chapter codec: XHTML chapter markup ⇄ plain text + placeholder sidecar.
//!
//! [`decode`] flattens one chapter's markup into editable lines, lifting
//! non-text fragments out into sidecar records. [`encode`] rebuilds valid
//! XHTML from those lines, substituting each marker with a fixed, schema-safe
//! rendering of its sidecar record. Encoding the output of a successful
//! decode yields semantically equivalent markup.

mod decode;
mod encode;

pub use decode::decode;
pub use encode::encode;

//! Extract an EPUB into an editable workspace.
//!
//! Layout of the destination directory:
//!
//! ```text
//! metadata.json          book-level metadata, spine, toc, item records
//! text/…/ch.txt          one plain-text file per chapter
//! text_meta/…/ch.meta.json   sidecar per chapter
//! text_xhtml/…/ch.xhtml  original markup, for human reference only
//! images/ styles/ misc/  binary assets, copied verbatim
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::book::{Category, Item, ItemRecord, SpineItem, WorkspaceMeta};
use crate::codec;
use crate::epub;
use crate::error::{Error, Result};
use crate::util::{file_stem, sanitize_relative_path};

pub const TEXT_DIR: &str = "text";
pub const TEXT_META_DIR: &str = "text_meta";
pub const TEXT_XHTML_DIR: &str = "text_xhtml";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Clear a non-empty destination instead of refusing to touch it.
    pub force: bool,
    /// Treat a per-chapter decode failure as fatal instead of degrading
    /// that chapter to its raw markup.
    pub strict: bool,
}

/// What happened during one extraction run.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub chapters: usize,
    pub assets: usize,
    pub failures: Vec<ChapterFailure>,
}

/// A chapter whose markup could not be decoded. The raw markup is still
/// extracted and the item stays in the book metadata.
#[derive(Debug)]
pub struct ChapterFailure {
    pub id: String,
    pub href: String,
    pub reason: String,
}

/// Extract `epub_path` into `out_dir`.
///
/// Fails fast if the destination holds content and `force` is not set.
/// Chapters that fail to decode degrade to raw-markup-only records unless
/// `strict` is set; the rest of the book is still extracted.
pub fn extract(epub_path: &Path, out_dir: &Path, opts: &ExtractOptions) -> Result<ExtractReport> {
    ensure_output_dir(out_dir, opts.force)?;

    let book = epub::read_epub(epub_path)?;
    let mut report = ExtractReport::default();
    let mut records: Vec<ItemRecord> = Vec::new();

    for (index, item) in book.items.iter().enumerate() {
        if is_navigation(item) {
            log::debug!("skipping navigation item {}", item.href);
            continue;
        }

        let category = Category::from_media_type(&item.media_type);
        let fallback = format!("item_{}.bin", index);
        let safe_rel = sanitize_relative_path(&item.href, &fallback);

        let record = if category == Category::Text {
            extract_chapter(out_dir, item, &safe_rel, opts, &mut report)?
        } else {
            let relative = PathBuf::from(category.dir()).join(&safe_rel);
            write_file(out_dir, &relative, &item.data)?;
            report.assets += 1;
            ItemRecord {
                id: item.id.clone(),
                href: item.href.clone(),
                media_type: item.media_type.clone(),
                category,
                relative_path: to_rel_string(&relative),
                sidecar_path: None,
                raw_path: None,
            }
        };
        records.push(record);
    }

    let spine: Vec<SpineItem> = book
        .spine
        .iter()
        .filter(|s| records.iter().any(|r| r.id == s.idref))
        .cloned()
        .collect();

    let meta = WorkspaceMeta {
        identifier: book.metadata.identifier.clone(),
        title: book.metadata.title.clone(),
        language: book.metadata.language.clone(),
        authors: book.metadata.authors.clone(),
        spine,
        toc: book.toc.clone(),
        items: records,
    };
    meta.save(out_dir)?;

    log::info!(
        "extracted {} chapters and {} assets to {}",
        report.chapters,
        report.assets,
        out_dir.display()
    );
    Ok(report)
}

fn extract_chapter(
    out_dir: &Path,
    item: &Item,
    safe_rel: &Path,
    opts: &ExtractOptions,
    report: &mut ExtractReport,
) -> Result<ItemRecord> {
    let raw_rel = PathBuf::from(TEXT_XHTML_DIR)
        .join(safe_rel)
        .with_extension("xhtml");
    // Original markup is always retained, even for chapters that fail to
    // decode.
    write_file(out_dir, &raw_rel, &item.data)?;

    let source = String::from_utf8_lossy(&item.data);
    let fallback_title = file_stem(&item.href).to_string();

    match codec::decode(&source, Some(&fallback_title)) {
        Ok(doc) => {
            let text_rel = PathBuf::from(TEXT_DIR).join(safe_rel).with_extension("txt");
            let meta_rel = PathBuf::from(TEXT_META_DIR)
                .join(safe_rel)
                .with_extension("meta.json");

            write_file(out_dir, &text_rel, doc.text().as_bytes())?;
            let sidecar = doc.sidecar(Some(to_rel_string(&raw_rel)));
            write_file(
                out_dir,
                &meta_rel,
                serde_json::to_string_pretty(&sidecar)?.as_bytes(),
            )?;

            report.chapters += 1;
            Ok(ItemRecord {
                id: item.id.clone(),
                href: item.href.clone(),
                media_type: item.media_type.clone(),
                category: Category::Text,
                relative_path: to_rel_string(&text_rel),
                sidecar_path: Some(to_rel_string(&meta_rel)),
                raw_path: Some(to_rel_string(&raw_rel)),
            })
        }
        Err(e) => {
            if opts.strict {
                return Err(Error::MalformedChapter {
                    href: item.href.clone(),
                    reason: e.to_string(),
                });
            }
            log::warn!("chapter {} failed to decode: {}; keeping raw markup", item.href, e);
            report.failures.push(ChapterFailure {
                id: item.id.clone(),
                href: item.href.clone(),
                reason: e.to_string(),
            });
            Ok(ItemRecord {
                id: item.id.clone(),
                href: item.href.clone(),
                media_type: item.media_type.clone(),
                category: Category::Text,
                relative_path: to_rel_string(&raw_rel),
                sidecar_path: None,
                raw_path: Some(to_rel_string(&raw_rel)),
            })
        }
    }
}

/// NCX and EPUB 3 navigation documents are regenerated at build time, so
/// they are not extracted as chapters.
fn is_navigation(item: &Item) -> bool {
    item.media_type == "application/x-dtbncx+xml" || item.has_property("nav")
}

fn ensure_output_dir(target: &Path, force: bool) -> Result<()> {
    if target.exists() {
        let has_content = fs::read_dir(target)?.next().is_some();
        if has_content {
            if !force {
                return Err(Error::DestinationNotEmpty(target.to_path_buf()));
            }
            fs::remove_dir_all(target)?;
        }
    }
    fs::create_dir_all(target)?;
    Ok(())
}

fn write_file(out_dir: &Path, relative: &Path, data: &[u8]) -> Result<()> {
    let target = out_dir.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target, data)?;
    Ok(())
}

/// Workspace-relative path as a forward-slash string, as stored in
/// metadata.json.
fn to_rel_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

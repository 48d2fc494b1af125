//! Rebuild an EPUB from an extracted workspace.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::book::{Book, ItemRecord, Metadata, TocEntry, WorkspaceMeta};
use crate::chapter::{ChapterDoc, Sidecar};
use crate::codec;
use crate::epub;
use crate::error::{Error, Result};
use crate::translate::{self, TranslationWarning};
use crate::util::file_stem;

/// Book-level metadata overrides. Overrides take precedence over the stored
/// workspace values; the workspace file itself is never rewritten.
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    pub title: Option<String>,
    pub identifier: Option<String>,
    pub language: Option<String>,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub overrides: MetadataOverrides,
    /// Directory holding `*_translated.txt` files, mirroring the workspace
    /// `text/` layout (flat files directly inside it also work).
    pub translations: Option<PathBuf>,
    /// Book language when translations are applied.
    pub target_language: String,
    /// External validator executable (epubcheck) to run on the result.
    pub validator: Option<PathBuf>,
    pub validator_args: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            overrides: MetadataOverrides::default(),
            translations: None,
            target_language: "zh".to_string(),
            validator: None,
            validator_args: Vec::new(),
        }
    }
}

/// What happened during one build run.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub chapters: usize,
    /// Chapters whose translation actually applied.
    pub translated: usize,
    pub warnings: Vec<TranslationWarning>,
}

/// Rebuild `in_dir` (an extracted workspace) into an EPUB at `output`.
///
/// Chapters are re-encoded from their text + sidecar pairs; assets are
/// copied verbatim. When a translations directory is given, each chapter
/// with a usable translation file is merged line by line and the book
/// language switches to the target language; a translation that does not
/// line up produces a warning and the chapter stays in its original
/// language. If a validator is configured it runs on the finished file and
/// its failure exit status is surfaced as an error.
pub fn build(in_dir: &Path, output: &Path, opts: &BuildOptions) -> Result<BuildReport> {
    let meta = WorkspaceMeta::load(in_dir)?;
    let mut report = BuildReport::default();
    let mut book = Book::new();
    let mut chapter_titles: Vec<(String, String)> = Vec::new();

    for record in &meta.items {
        let data = if record.is_decoded_chapter() {
            let (data, title) = rebuild_chapter(in_dir, record, opts, &mut report)?;
            chapter_titles.push((record.href.clone(), title));
            data
        } else {
            // Degraded chapters and assets go back verbatim.
            let path = in_dir.join(&record.relative_path);
            if !path.exists() {
                return Err(Error::MissingAsset {
                    href: record.href.clone(),
                    path,
                });
            }
            std::fs::read(&path)?
        };
        book.add_item(&record.id, &record.href, &record.media_type, data);
    }

    for entry in &meta.spine {
        if meta.record_by_id(&entry.idref).is_none() {
            return Err(Error::UnknownSpineEntry(entry.idref.clone()));
        }
    }
    book.spine = meta.spine.clone();

    let translating = opts.translations.is_some();
    book.metadata = effective_metadata(&meta, opts, translating);

    book.toc = if meta.toc.is_empty() {
        synthesize_toc(&meta, &chapter_titles)
    } else {
        meta.toc.clone()
    };

    epub::write_epub(&book, output)?;
    log::info!(
        "built {} ({} chapters, {} translated)",
        output.display(),
        report.chapters,
        report.translated
    );

    if let Some(validator) = &opts.validator {
        run_validator(validator, &opts.validator_args, output)?;
    }

    Ok(report)
}

fn rebuild_chapter(
    in_dir: &Path,
    record: &ItemRecord,
    opts: &BuildOptions,
    report: &mut BuildReport,
) -> Result<(Vec<u8>, String)> {
    let text_path = in_dir.join(&record.relative_path);
    if !text_path.exists() {
        return Err(Error::MissingAsset {
            href: record.href.clone(),
            path: text_path,
        });
    }
    let text = std::fs::read_to_string(&text_path)?;

    let sidecar_rel = record.sidecar_path.as_deref().unwrap_or_default();
    let sidecar_raw = std::fs::read_to_string(in_dir.join(sidecar_rel))?;
    let sidecar: Sidecar = serde_json::from_str(&sidecar_raw)?;

    let mut doc = ChapterDoc::from_text(&text, &sidecar);

    let mut translated = false;
    if let Some(translations) = &opts.translations {
        let text_rel = Path::new(&record.relative_path);
        let candidate = translate::load_translation(translations, text_rel).or_else(|| {
            // Flat layout: translated files directly in the directory.
            text_rel
                .file_name()
                .and_then(|n| translate::load_translation(translations, Path::new(n)))
        });

        if let Some(candidate) = candidate {
            let (merged, warning) = translate::merge_lines(&doc, &record.href, Some(&candidate));
            match warning {
                Some(w) => report.warnings.push(w),
                None => {
                    doc.body_lines = merged;
                    if let Some(first) = doc.body_lines.first() {
                        doc.title = first.clone();
                    }
                    translated = true;
                }
            }
        }
    }

    let language = if translated {
        Some(opts.target_language.as_str())
    } else {
        None
    };
    let xhtml = codec::encode(&doc, &record.href, language)?;

    report.chapters += 1;
    if translated {
        report.translated += 1;
    }
    Ok((xhtml.into_bytes(), doc.title.clone()))
}

/// Overrides win over stored values. The book language additionally flips
/// to the target language when a translation pass is requested, unless an
/// explicit override pins it.
fn effective_metadata(meta: &WorkspaceMeta, opts: &BuildOptions, translating: bool) -> Metadata {
    let ov = &opts.overrides;
    let language = ov
        .language
        .clone()
        .or_else(|| translating.then(|| opts.target_language.clone()))
        .unwrap_or_else(|| meta.language.clone());

    Metadata {
        identifier: ov.identifier.clone().unwrap_or_else(|| meta.identifier.clone()),
        title: ov.title.clone().unwrap_or_else(|| meta.title.clone()),
        language,
        authors: if ov.authors.is_empty() {
            meta.authors.clone()
        } else {
            ov.authors.clone()
        },
    }
}

/// One flat entry per linear spine chapter when the source carried no toc.
fn synthesize_toc(meta: &WorkspaceMeta, chapter_titles: &[(String, String)]) -> Vec<TocEntry> {
    meta.spine
        .iter()
        .filter(|s| s.linear)
        .filter_map(|s| meta.record_by_id(&s.idref))
        .map(|record| {
            let title = chapter_titles
                .iter()
                .find(|(href, _)| *href == record.href)
                .map(|(_, title)| title.clone())
                .unwrap_or_else(|| file_stem(&record.href).to_string());
            TocEntry::new(title, record.href.clone())
        })
        .collect()
}

fn run_validator(validator: &Path, extra_args: &[String], output: &Path) -> Result<()> {
    let command = validator.to_string_lossy().into_owned();
    log::info!("running validator: {} {}", command, output.display());

    let result = Command::new(validator)
        .args(extra_args)
        .arg(output)
        .output()?;

    let stdout = String::from_utf8_lossy(&result.stdout);
    let stderr = String::from_utf8_lossy(&result.stderr);
    if !stdout.trim().is_empty() {
        log::info!("validator output:\n{}", stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        log::warn!("validator stderr:\n{}", stderr.trim_end());
    }

    if !result.status.success() {
        return Err(Error::Validator {
            command,
            code: result.status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

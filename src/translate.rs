//! Merge translated text back into decoded chapters.
//!
//! A translation is a plain-text file per chapter, named after the
//! chapter's text file with a `_translated` suffix, holding exactly one
//! line per original line. Markers and blank lines must be preserved
//! verbatim by the translator; the merge keeps the original on those
//! lines regardless, so a translation only replaces prose.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::chapter::{ChapterDoc, parse_marker};

/// A chapter whose translation could not be applied. The chapter is kept
/// in its original language; the build still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationWarning {
    pub chapter: String,
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for TranslationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "translation for {} has {} lines, expected {}; keeping original text",
            self.chapter, self.actual, self.expected
        )
    }
}

/// `text/ch01.txt` → `text/ch01_translated.txt`.
pub fn translation_file_name(text_path: &Path) -> PathBuf {
    let stem = text_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = format!("{stem}_translated");
    if let Some(ext) = text_path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    text_path.with_file_name(name)
}

/// Load the candidate lines for one chapter, or `None` when no
/// translation file exists. An unreadable file is treated the same as a
/// missing one, with a warning in the log.
pub fn load_translation(translations_dir: &Path, text_rel: &Path) -> Option<Vec<String>> {
    let path = translations_dir.join(translation_file_name(text_rel));
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(&path) {
        Ok(content) => Some(split_lines(&content)),
        Err(e) => {
            log::warn!("cannot read translation {}: {}", path.display(), e);
            None
        }
    }
}

/// Line-by-line merge of a chapter with its candidate translation.
///
/// Returns the merged lines plus an optional warning. The original lines
/// come back untouched when there is no candidate or when the line counts
/// disagree; a translation failure is never fatal.
pub fn merge_lines(
    doc: &ChapterDoc,
    chapter: &str,
    candidate: Option<&[String]>,
) -> (Vec<String>, Option<TranslationWarning>) {
    let original = &doc.body_lines;
    let candidate = match candidate {
        Some(lines) => lines,
        None => return (original.clone(), None),
    };

    if candidate.len() != original.len() {
        let warning = TranslationWarning {
            chapter: chapter.to_string(),
            expected: original.len(),
            actual: candidate.len(),
        };
        log::warn!("{warning}");
        return (original.clone(), Some(warning));
    }

    let merged = original
        .iter()
        .zip(candidate)
        .map(|(orig, cand)| {
            // Blank lines and markers are structure, not prose.
            if orig.trim().is_empty() || parse_marker(orig).is_some() {
                orig.clone()
            } else if cand.trim().is_empty() || parse_marker(cand).is_some() {
                // A candidate line may neither delete prose nor manufacture
                // structure; a translated line is prose by contract.
                orig.clone()
            } else {
                cand.clone()
            }
        })
        .collect();

    (merged, None)
}

/// Split file content into lines the same way the chapter text was
/// written: a trailing newline does not produce a final empty line.
fn split_lines(content: &str) -> Vec<String> {
    let trimmed = content.strip_suffix('\n').unwrap_or(content);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

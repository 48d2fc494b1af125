use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use unbind::{
    Book, BuildOptions, Error, ExtractOptions, Metadata, PlaceholderKind, Sidecar, SpineItem,
    TocEntry, build, extract, read_epub, write_epub,
};

fn chapter_markup(title: &str, paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs.iter().map(|p| format!("<p>{p}</p>\n")).collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="en">
<head><title>{title}</title></head>
<body>
<h1>{title}</h1>
{body}</body>
</html>"#
    )
    .into_bytes()
}

/// A three-chapter book: prose, prose with an inline image, prose.
fn sample_epub(dir: &Path) -> PathBuf {
    let mut book = Book::new();
    book.metadata = Metadata {
        identifier: "urn:isbn:9780000000001".into(),
        title: "The Test Book".into(),
        language: "en".into(),
        authors: vec!["Test Author".into()],
    };

    book.add_item(
        "ch1",
        "ch1.xhtml",
        "application/xhtml+xml",
        chapter_markup("Chapter One", &["First paragraph.", "Second paragraph."]),
    );
    book.add_item(
        "ch2",
        "ch2.xhtml",
        "application/xhtml+xml",
        chapter_markup(
            "Chapter Two",
            &[
                "Before the figure.",
                r#"<img src="images/fig.png" alt="A figure"/>"#,
                "After the figure.",
            ],
        ),
    );
    book.add_item(
        "ch3",
        "ch3.xhtml",
        "application/xhtml+xml",
        chapter_markup("Chapter Three", &["The end."]),
    );
    book.add_item("fig", "images/fig.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47]);

    for idref in ["ch1", "ch2", "ch3"] {
        book.spine.push(SpineItem {
            idref: idref.into(),
            linear: true,
        });
    }
    book.toc.push(TocEntry::new("Chapter One", "ch1.xhtml"));
    book.toc.push(TocEntry::new("Chapter Two", "ch2.xhtml"));
    book.toc.push(TocEntry::new("Chapter Three", "ch3.xhtml"));

    let path = dir.join("sample.epub");
    write_epub(&book, &path).expect("Failed to write sample EPUB");
    path
}

#[test]
fn test_extract_creates_workspace() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");

    let report = extract(&epub, &workspace, &ExtractOptions::default()).unwrap();
    assert_eq!(report.chapters, 3);
    assert_eq!(report.assets, 1);
    assert!(report.failures.is_empty());

    assert!(workspace.join("metadata.json").exists());
    assert!(workspace.join("text/ch1.txt").exists());
    assert!(workspace.join("text_meta/ch2.meta.json").exists());
    assert!(workspace.join("text_xhtml/ch3.xhtml").exists());
    assert!(workspace.join("images/images/fig.png").exists());

    let ch1 = fs::read_to_string(workspace.join("text/ch1.txt")).unwrap();
    let lines: Vec<&str> = ch1.lines().collect();
    assert_eq!(lines[0], "Chapter One");
    assert_eq!(lines[1], "");
    assert_eq!(lines[2], "First paragraph.");
}

#[test]
fn test_extract_records_image_placeholder() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    let sidecar: Sidecar =
        serde_json::from_str(&fs::read_to_string(workspace.join("text_meta/ch2.meta.json")).unwrap())
            .unwrap();
    assert_eq!(sidecar.placeholders.len(), 1);
    let placeholder = &sidecar.placeholders[0];
    assert_eq!(placeholder.kind, PlaceholderKind::Image);
    assert_eq!(placeholder.src, "images/fig.png");
    assert_eq!(placeholder.alt, "A figure");

    let ch2 = fs::read_to_string(workspace.join("text/ch2.txt")).unwrap();
    assert!(ch2.contains(&placeholder.marker));
}

#[test]
fn test_extract_refuses_non_empty_destination() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(workspace.join("leftover.txt"), "x").unwrap();

    let err = extract(&epub, &workspace, &ExtractOptions::default()).unwrap_err();
    assert!(matches!(err, Error::DestinationNotEmpty(_)));

    let opts = ExtractOptions {
        force: true,
        ..ExtractOptions::default()
    };
    extract(&epub, &workspace, &opts).unwrap();
    assert!(!workspace.join("leftover.txt").exists());
}

#[test]
fn test_rebuild_round_trip() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    let output = tmp.path().join("rebuilt.epub");
    let report = build(&workspace, &output, &BuildOptions::default()).unwrap();
    assert_eq!(report.chapters, 3);
    assert_eq!(report.translated, 0);
    assert!(report.warnings.is_empty());

    let rebuilt = read_epub(&output).unwrap();
    assert_eq!(rebuilt.metadata.title, "The Test Book");
    assert_eq!(rebuilt.metadata.language, "en");
    assert_eq!(rebuilt.spine.len(), 3);
    assert_eq!(rebuilt.toc.len(), 3);

    let ch2 = String::from_utf8(rebuilt.item_by_href("ch2.xhtml").unwrap().data.clone()).unwrap();
    assert!(ch2.contains("<h1>Chapter Two</h1>"));
    assert!(ch2.contains("<p>Before the figure.</p>"));
    assert!(ch2.contains(r#"<img src="images/fig.png" alt="A figure"/>"#));
    // The image asset itself survives untouched.
    assert_eq!(
        rebuilt.item_by_href("images/fig.png").unwrap().data,
        vec![0x89, 0x50, 0x4e, 0x47]
    );
}

#[test]
fn test_metadata_overrides_apply_without_rewriting_workspace() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();
    let stored_before = fs::read_to_string(workspace.join("metadata.json")).unwrap();

    let opts = BuildOptions {
        overrides: unbind::MetadataOverrides {
            title: Some("Renamed".into()),
            authors: vec!["Editor".into()],
            ..unbind::MetadataOverrides::default()
        },
        ..BuildOptions::default()
    };
    let output = tmp.path().join("renamed.epub");
    build(&workspace, &output, &opts).unwrap();

    let rebuilt = read_epub(&output).unwrap();
    assert_eq!(rebuilt.metadata.title, "Renamed");
    assert_eq!(rebuilt.metadata.authors, vec!["Editor".to_string()]);
    assert_eq!(rebuilt.metadata.identifier, "urn:isbn:9780000000001");

    let stored_after = fs::read_to_string(workspace.join("metadata.json")).unwrap();
    assert_eq!(stored_before, stored_after);
}

#[test]
fn test_translation_merge_applied() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    // ch1.txt has 5 lines: title, blank, para, blank, para.
    let translations = tmp.path().join("translated");
    fs::create_dir_all(&translations).unwrap();
    fs::write(
        translations.join("ch1_translated.txt"),
        "第一章\n\n第一段。\n\n第二段。\n",
    )
    .unwrap();

    let opts = BuildOptions {
        translations: Some(translations),
        ..BuildOptions::default()
    };
    let output = tmp.path().join("translated.epub");
    let report = build(&workspace, &output, &opts).unwrap();
    assert_eq!(report.translated, 1);
    assert!(report.warnings.is_empty());

    let rebuilt = read_epub(&output).unwrap();
    assert_eq!(rebuilt.metadata.language, "zh");

    let ch1 = String::from_utf8(rebuilt.item_by_href("ch1.xhtml").unwrap().data.clone()).unwrap();
    assert!(ch1.contains("<h1>第一章</h1>"));
    assert!(ch1.contains("<p>第一段。</p>"));
    assert!(ch1.contains("lang=\"zh\""));

    // Untranslated chapters stay in the original language.
    let ch3 = String::from_utf8(rebuilt.item_by_href("ch3.xhtml").unwrap().data.clone()).unwrap();
    assert!(ch3.contains("<p>The end.</p>"));
    assert!(ch3.contains("lang=\"en\""));
}

#[test]
fn test_mismatched_translation_falls_back() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    // One line short: the merge must not apply.
    let translations = tmp.path().join("translated");
    fs::create_dir_all(&translations).unwrap();
    fs::write(
        translations.join("ch1_translated.txt"),
        "第一章\n\n第一段。\n",
    )
    .unwrap();

    let opts = BuildOptions {
        translations: Some(translations),
        ..BuildOptions::default()
    };
    let output = tmp.path().join("translated.epub");
    let report = build(&workspace, &output, &opts).unwrap();
    assert_eq!(report.translated, 0);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].chapter, "ch1.xhtml");

    let rebuilt = read_epub(&output).unwrap();
    let ch1 = String::from_utf8(rebuilt.item_by_href("ch1.xhtml").unwrap().data.clone()).unwrap();
    assert!(ch1.contains("<p>First paragraph.</p>"));
    assert!(ch1.contains("lang=\"en\""));
}

fn epub_with_broken_chapter(dir: &Path) -> PathBuf {
    let mut book = Book::new();
    book.metadata = Metadata {
        identifier: "urn:isbn:9780000000002".into(),
        title: "Partly Broken".into(),
        language: "en".into(),
        authors: Vec::new(),
    };
    book.add_item(
        "ch1",
        "ch1.xhtml",
        "application/xhtml+xml",
        chapter_markup("Chapter One", &["Fine."]),
    );
    book.add_item(
        "ch2",
        "ch2.xhtml",
        "application/xhtml+xml",
        b"<html><body><p>never closed</body></html>".to_vec(),
    );
    for idref in ["ch1", "ch2"] {
        book.spine.push(SpineItem {
            idref: idref.into(),
            linear: true,
        });
    }
    let path = dir.join("broken.epub");
    write_epub(&book, &path).expect("Failed to write sample EPUB");
    path
}

#[test]
fn test_undecodable_chapter_degrades_to_raw() {
    let tmp = TempDir::new().unwrap();
    let epub = epub_with_broken_chapter(tmp.path());
    let workspace = tmp.path().join("workspace");

    let report = extract(&epub, &workspace, &ExtractOptions::default()).unwrap();
    assert_eq!(report.chapters, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].href, "ch2.xhtml");

    // No text/sidecar pair for the broken chapter, but the raw markup is kept.
    assert!(!workspace.join("text/ch2.txt").exists());
    assert!(workspace.join("text_xhtml/ch2.xhtml").exists());

    // The build carries it back verbatim.
    let output = tmp.path().join("rebuilt.epub");
    build(&workspace, &output, &BuildOptions::default()).unwrap();
    let rebuilt = read_epub(&output).unwrap();
    assert_eq!(
        rebuilt.item_by_href("ch2.xhtml").unwrap().data,
        b"<html><body><p>never closed</body></html>".to_vec()
    );
    assert_eq!(rebuilt.spine.len(), 2);
}

#[test]
fn test_strict_extract_fails_on_broken_chapter() {
    let tmp = TempDir::new().unwrap();
    let epub = epub_with_broken_chapter(tmp.path());
    let workspace = tmp.path().join("workspace");

    let opts = ExtractOptions {
        strict: true,
        ..ExtractOptions::default()
    };
    let err = extract(&epub, &workspace, &opts).unwrap_err();
    assert!(matches!(err, Error::MalformedChapter { .. }));
}

#[cfg(unix)]
#[test]
fn test_validator_failure_is_surfaced() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    let opts = BuildOptions {
        validator: Some(PathBuf::from("/bin/false")),
        ..BuildOptions::default()
    };
    let output = tmp.path().join("checked.epub");
    let err = build(&workspace, &output, &opts).unwrap_err();
    match err {
        Error::Validator { code, .. } => assert_eq!(code, 1),
        other => panic!("expected validator error, got {other}"),
    }
    // The EPUB itself was still written before validation ran.
    assert!(output.exists());
}

#[cfg(unix)]
#[test]
fn test_validator_success_passes_through() {
    let tmp = TempDir::new().unwrap();
    let epub = sample_epub(tmp.path());
    let workspace = tmp.path().join("workspace");
    extract(&epub, &workspace, &ExtractOptions::default()).unwrap();

    let opts = BuildOptions {
        validator: Some(PathBuf::from("/bin/true")),
        ..BuildOptions::default()
    };
    let output = tmp.path().join("checked.epub");
    build(&workspace, &output, &opts).unwrap();
}

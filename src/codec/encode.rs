//! Encode direction: plain text lines + sidecar → XHTML chapter markup.
//!
//! Every placeholder kind is normalized to one fixed, schema-valid
//! rendering, so the output validates no matter what markup the fragment
//! originally carried:
//!
//! - `image` and `vector` become `<img src alt/>` with non-empty alt text
//! - `cross_ref` becomes `<a href>label</a>`

use std::collections::HashMap;

use crate::chapter::{ChapterDoc, Placeholder, PlaceholderKind, parse_marker};
use crate::error::Result;
use crate::util::{escape_xml, file_stem};

/// Rebuild valid XHTML from a decoded (and possibly hand-edited or
/// translation-merged) chapter.
///
/// `language` overrides the chapter's stored language; `href` only labels
/// error reports. A marker without a sidecar entry is a structural error;
/// sidecar entries never referenced by a marker are dropped silently.
pub fn encode(doc: &ChapterDoc, href: &str, language: Option<&str>) -> Result<String> {
    doc.verify_markers(href)?;

    let by_marker: HashMap<&str, &Placeholder> = doc
        .placeholders
        .iter()
        .map(|p| (p.marker.as_str(), p))
        .collect();

    let mut body = String::new();
    body.push_str(&format!("<h1>{}</h1>\n", escape_xml(doc.title.trim())));

    for paragraph in paragraphs(&doc.body_lines) {
        // Markers sit on lines of their own; prose on either side of one
        // within the same blank-delimited chunk still forms paragraphs.
        let mut prose: Vec<&str> = Vec::new();
        for line in paragraph {
            if let Some(marker) = parse_marker(line) {
                flush_paragraph(&mut body, &mut prose);
                // verify_markers guarantees the lookup succeeds
                if let Some(placeholder) = by_marker.get(marker) {
                    body.push_str(&placeholder_markup(placeholder));
                    body.push('\n');
                }
            } else {
                prose.push(line);
            }
        }
        flush_paragraph(&mut body, &mut prose);
    }

    let lang = language
        .or(doc.language.as_deref())
        .filter(|l| !l.is_empty());
    // XHTML 1.1, to match the EPUB 2 package the writer generates. The
    // 1.1 DTD drops the bare lang attribute, so xml:lang only.
    let lang_attrs = match lang {
        Some(l) => format!(" xml:lang=\"{}\"", escape_xml(l)),
        None => String::new(),
    };

    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"{lang_attrs}>\n\
         <head>\n  <title>{title}</title>\n</head>\n\
         <body>\n{body}</body>\n</html>\n",
        title = escape_xml(doc.title.trim()),
    ))
}

/// Body lines after the title and its blank separator, grouped into
/// blank-delimited paragraphs.
fn paragraphs(body_lines: &[String]) -> Vec<Vec<&String>> {
    let content = match body_lines {
        [] => &[][..],
        // Skip the title line; tolerate a hand-edited file that lost the
        // separator.
        [_, rest @ ..] if rest.first().is_some_and(|l| l.is_empty()) => &rest[1..],
        [_, rest @ ..] => rest,
    };

    let mut groups: Vec<Vec<&String>> = Vec::new();
    let mut current: Vec<&String> = Vec::new();
    for line in content {
        if line.trim().is_empty() {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn flush_paragraph(body: &mut String, prose: &mut Vec<&str>) {
    if prose.is_empty() {
        return;
    }
    let escaped: Vec<String> = prose.iter().map(|l| escape_xml(l)).collect();
    body.push_str(&format!("<p>{}</p>\n", escaped.join("<br/>")));
    prose.clear();
}

/// The normalization table: one fixed rendering per placeholder kind.
fn placeholder_markup(placeholder: &Placeholder) -> String {
    let label = effective_alt(placeholder);
    match placeholder.kind {
        PlaceholderKind::Image | PlaceholderKind::Vector => format!(
            "<p><img src=\"{}\" alt=\"{}\"/></p>",
            escape_xml(&placeholder.src),
            escape_xml(&label)
        ),
        PlaceholderKind::CrossRef => format!(
            "<p><a href=\"{}\">{}</a></p>",
            escape_xml(&placeholder.src),
            escape_xml(&label)
        ),
    }
}

/// Alt text / link label, guaranteed non-empty: declared text first, then
/// the source file stem, then a generic label.
fn effective_alt(placeholder: &Placeholder) -> String {
    let alt = placeholder.alt.trim();
    if !alt.is_empty() {
        return alt.to_string();
    }
    let stem = file_stem(&placeholder.src);
    if !stem.is_empty() {
        return stem.to_string();
    }
    "illustration".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::marker_for;
    use crate::error::Error;

    fn doc(lines: &[&str], placeholders: Vec<Placeholder>) -> ChapterDoc {
        ChapterDoc {
            title: lines.first().unwrap_or(&"Untitled").to_string(),
            language: None,
            body_lines: lines.iter().map(|l| l.to_string()).collect(),
            placeholders,
        }
    }

    #[test]
    fn test_text_only_chapter() {
        let out = encode(
            &doc(&["Chapter One", "", "First.", "", "Second."], Vec::new()),
            "ch.xhtml",
            Some("en"),
        )
        .unwrap();
        assert!(out.contains("<h1>Chapter One</h1>"));
        assert!(out.contains("<p>First.</p>"));
        assert!(out.contains("<p>Second.</p>"));
        assert!(out.contains("lang=\"en\""));
        assert!(out.contains("xmlns=\"http://www.w3.org/1999/xhtml\""));
    }

    #[test]
    fn test_doctype_matches_epub2_package() {
        let out = encode(
            &doc(&["T", "", "Prose."], Vec::new()),
            "ch.xhtml",
            Some("en"),
        )
        .unwrap();
        assert!(out.contains("-//W3C//DTD XHTML 1.1//EN"));
        assert!(!out.contains("<!DOCTYPE html>"));
        // XHTML 1.1 has no bare lang attribute.
        assert!(out.contains("xml:lang=\"en\""));
        assert!(!out.contains(" lang=\"en\""));
    }

    #[test]
    fn test_intra_paragraph_breaks_become_br() {
        let out = encode(
            &doc(&["T", "", "one", "two"], Vec::new()),
            "ch.xhtml",
            None,
        )
        .unwrap();
        assert!(out.contains("<p>one<br/>two</p>"));
    }

    #[test]
    fn test_text_is_escaped() {
        let out = encode(
            &doc(&["A < B", "", "Tom & Jerry"], Vec::new()),
            "ch.xhtml",
            None,
        )
        .unwrap();
        assert!(out.contains("<h1>A &lt; B</h1>"));
        assert!(out.contains("<p>Tom &amp; Jerry</p>"));
    }

    #[test]
    fn test_image_placeholder_normalized() {
        let marker = marker_for(1);
        let out = encode(
            &doc(
                &["T", "", "Before.", "", &marker, "", "After."],
                vec![Placeholder {
                    marker: marker.clone(),
                    kind: PlaceholderKind::Image,
                    src: "images/fig.png".into(),
                    alt: "A figure".into(),
                }],
            ),
            "ch.xhtml",
            None,
        )
        .unwrap();
        assert!(out.contains("<p><img src=\"images/fig.png\" alt=\"A figure\"/></p>"));
    }

    #[test]
    fn test_vector_placeholder_becomes_img() {
        let marker = marker_for(1);
        let out = encode(
            &doc(
                &["T", "", &marker],
                vec![Placeholder {
                    marker: marker.clone(),
                    kind: PlaceholderKind::Vector,
                    src: "images/cover.jpg".into(),
                    alt: String::new(),
                }],
            ),
            "ch.xhtml",
            None,
        )
        .unwrap();
        // No svg wrapper survives, and alt text falls back to the file stem.
        assert!(!out.contains("<svg"));
        assert!(out.contains("<p><img src=\"images/cover.jpg\" alt=\"cover\"/></p>"));
    }

    #[test]
    fn test_cross_ref_placeholder_becomes_anchor() {
        let marker = marker_for(1);
        let out = encode(
            &doc(
                &["T", "", &marker],
                vec![Placeholder {
                    marker: marker.clone(),
                    kind: PlaceholderKind::CrossRef,
                    src: "notes.xhtml".into(),
                    alt: "Notes".into(),
                }],
            ),
            "ch.xhtml",
            None,
        )
        .unwrap();
        assert!(out.contains("<p><a href=\"notes.xhtml\">Notes</a></p>"));
    }

    #[test]
    fn test_dangling_marker_is_an_error() {
        let result = encode(
            &doc(&["T", "", "[[BLOCK-0001]]"], Vec::new()),
            "ch.xhtml",
            None,
        );
        assert!(matches!(result, Err(Error::DanglingMarker { .. })));
    }

    #[test]
    fn test_unreferenced_placeholder_dropped_silently() {
        let out = encode(
            &doc(
                &["T", "", "Only prose."],
                vec![Placeholder {
                    marker: marker_for(1),
                    kind: PlaceholderKind::Image,
                    src: "gone.png".into(),
                    alt: String::new(),
                }],
            ),
            "ch.xhtml",
            None,
        )
        .unwrap();
        assert!(!out.contains("gone.png"));
        assert!(out.contains("<p>Only prose.</p>"));
    }

    #[test]
    fn test_round_trip_with_decode() {
        let marker = marker_for(1);
        let original = doc(
            &["Chapter One", "", "First paragraph.", "", &marker, "", "Second paragraph."],
            vec![Placeholder {
                marker: marker.clone(),
                kind: PlaceholderKind::Image,
                src: "images/fig.png".into(),
                alt: "A figure".into(),
            }],
        );
        let xhtml = encode(&original, "ch.xhtml", Some("en")).unwrap();
        let decoded = crate::codec::decode(&xhtml, None).unwrap();
        assert_eq!(decoded.title, original.title);
        assert_eq!(decoded.body_lines, original.body_lines);
        assert_eq!(decoded.placeholders.len(), 1);
        assert_eq!(decoded.placeholders[0].src, "images/fig.png");
        assert_eq!(decoded.placeholders[0].alt, "A figure");
        assert_eq!(decoded.language.as_deref(), Some("en"));
    }
}

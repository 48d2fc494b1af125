//! Decode direction: XHTML chapter markup → plain text lines + sidecar.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::chapter::{ChapterDoc, Placeholder, PlaceholderKind, marker_for, parse_marker};
use crate::error::{Error, Result};
use crate::util::resolve_entity;

/// Tags whose subtree cannot be flattened to prose.
const SPECIAL_TAGS: &[&str] = &["img", "svg", "image", "object", "iframe"];

/// Tags whose direct text is descriptive, not prose (SVG accessibility text).
const TEXT_IGNORE_TAGS: &[&str] = &["desc", "title", "metadata"];

/// Decode one chapter's XHTML into a [`ChapterDoc`].
///
/// The title is taken from the first heading element, falling back to the
/// first non-empty prose line, then to `fallback_title`. The returned
/// document always satisfies the title/blank-separator invariant:
/// `body_lines[0]` is the title and `body_lines[1]` is empty.
pub fn decode(source: &str, fallback_title: Option<&str>) -> Result<ChapterDoc> {
    let source = source.trim_start_matches('\u{feff}');
    let root = parse_document(source)?;
    let language = root
        .find("html")
        .and_then(|html| html.attr_local("lang"))
        .map(str::to_string)
        .filter(|l| !l.is_empty());
    let body = root.find("body").unwrap_or(&root);

    let mut flat = Flattener::default();
    flat.walk(body);
    Ok(flat.finish(language, fallback_title))
}

/// A parsed element: lowercased local name, attributes, ordered children.
struct XmlElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    /// Attribute lookup by exact name, case-insensitive.
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Attribute lookup by local name, matching both `local` and `*:local`.
    fn attr_local(&self, local: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| {
                let k_local = k.rsplit(':').next().unwrap_or(k);
                k_local.eq_ignore_ascii_case(local)
            })
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first element named `name`, self included.
    fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.elements().find_map(|child| child.find(name))
    }

    fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// All descendant text, whitespace-collapsed.
    fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out.trim().to_string()
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(t) => {
                    for word in t.split_whitespace() {
                        if !out.is_empty() && !out.ends_with(' ') {
                            out.push(' ');
                        }
                        out.push_str(word);
                    }
                }
                XmlNode::Element(e) => e.collect_text(out),
            }
        }
    }
}

fn element_from(start: &BytesStart<'_>) -> XmlElement {
    let raw_name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let name = raw_name
        .rsplit(':')
        .next()
        .unwrap_or(&raw_name)
        .to_ascii_lowercase();

    let mut attrs = Vec::new();
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let raw = String::from_utf8_lossy(&attr.value).to_string();
        let value = quick_xml::escape::unescape(&raw)
            .map(|v| v.into_owned())
            .unwrap_or(raw);
        attrs.push((key, value));
    }
    XmlElement {
        name,
        attrs,
        children: Vec::new(),
    }
}

/// Parse a whole XHTML document into a lightweight element tree.
///
/// Malformed markup surfaces as [`Error::Xml`]; the caller decides whether
/// that degrades the chapter or aborts the run.
fn parse_document(source: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(source);

    let mut stack: Vec<XmlElement> = vec![XmlElement {
        name: "#document".into(),
        attrs: Vec::new(),
        children: Vec::new(),
    }];

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)),
            Ok(Event::Empty(e)) => {
                let elem = element_from(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Element(elem));
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1
                    && let Some(elem) = stack.pop()
                    && let Some(parent) = stack.last_mut()
                {
                    parent.children.push(XmlNode::Element(elem));
                }
            }
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).to_string();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(text));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                let name = String::from_utf8_lossy(e.as_ref()).to_string();
                let resolved = resolve_entity(&name);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(XmlNode::Text(resolved));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    // Unclosed elements fold back into the root so truncated-but-parseable
    // fragments still decode.
    while stack.len() > 1 {
        if let Some(elem) = stack.pop()
            && let Some(parent) = stack.last_mut()
        {
            parent.children.push(XmlNode::Element(elem));
        }
    }
    Ok(stack.pop().unwrap_or(XmlElement {
        name: "#document".into(),
        attrs: Vec::new(),
        children: Vec::new(),
    }))
}

/// True when `elem` or any descendant is a non-text media element.
fn contains_special(elem: &XmlElement) -> bool {
    SPECIAL_TAGS.contains(&elem.name.as_str()) || elem.elements().any(contains_special)
}

/// True when the subtree carries prose. Text directly inside SVG
/// accessibility elements does not count.
fn has_meaningful_text(elem: &XmlElement) -> bool {
    let ignore = TEXT_IGNORE_TAGS.contains(&elem.name.as_str());
    for child in &elem.children {
        match child {
            XmlNode::Text(t) if !ignore && !t.trim().is_empty() => return true,
            XmlNode::Element(e) if has_meaningful_text(e) => return true,
            _ => {}
        }
    }
    false
}

/// A minimal subtree that should be replaced by a position marker: it holds
/// non-text media (or is a text-free link) and contains no prose.
fn is_placeholder_block(elem: &XmlElement) -> bool {
    let text_free_link = elem.name == "a" && elem.attr_local("href").is_some();
    (contains_special(elem) || text_free_link) && !has_meaningful_text(elem)
}

/// Extract the (kind, src, alt) triple for a placeholder block. `None` when
/// no reference path can be determined; such blocks carry nothing
/// representable and are dropped.
fn placeholder_parts(elem: &XmlElement) -> Option<(PlaceholderKind, String, String)> {
    if let Some(svg) = elem.find("svg") {
        let src = svg
            .find("image")
            .and_then(|image| image.attr_local("href"))
            .unwrap_or_default()
            .to_string();
        if !src.is_empty() {
            let alt = svg
                .find("desc")
                .map(XmlElement::text_content)
                .filter(|t| !t.is_empty())
                .or_else(|| {
                    svg.find("title")
                        .map(XmlElement::text_content)
                        .filter(|t| !t.is_empty())
                })
                .unwrap_or_default();
            return Some((PlaceholderKind::Vector, src, alt));
        }
    }
    if let Some(img) = elem.find("img") {
        let src = img.attr("src").unwrap_or_default().to_string();
        if !src.is_empty() {
            let alt = img.attr("alt").unwrap_or_default().trim().to_string();
            return Some((PlaceholderKind::Image, src, alt));
        }
    }
    if let Some(object) = elem.find("object") {
        let src = object.attr("data").unwrap_or_default().to_string();
        if !src.is_empty() {
            let alt = object.text_content();
            return Some((PlaceholderKind::Image, src, alt));
        }
    }
    if let Some(anchor) = elem.find("a") {
        let src = anchor.attr_local("href").unwrap_or_default().to_string();
        if !src.is_empty() {
            let alt = anchor.attr("title").unwrap_or_default().trim().to_string();
            return Some((PlaceholderKind::CrossRef, src, alt));
        }
    }
    if let Some(frame) = elem.find("iframe") {
        let src = frame.attr("src").unwrap_or_default().to_string();
        if !src.is_empty() {
            let alt = frame.attr("title").unwrap_or_default().trim().to_string();
            return Some((PlaceholderKind::CrossRef, src, alt));
        }
    }
    None
}

const BLOCK_TAGS: &[&str] = &[
    "p",
    "div",
    "blockquote",
    "li",
    "dt",
    "dd",
    "figure",
    "figcaption",
    "section",
    "article",
    "aside",
    "header",
    "footer",
    "pre",
    "table",
    "tr",
    "td",
    "th",
    "caption",
    "ul",
    "ol",
    "dl",
    "nav",
    "main",
    "center",
];

#[derive(Default)]
struct Flattener {
    lines: Vec<String>,
    current: String,
    first_heading: Option<String>,
    placeholders: Vec<Placeholder>,
}

impl Flattener {
    fn walk(&mut self, elem: &XmlElement) {
        for child in &elem.children {
            match child {
                XmlNode::Text(t) => self.push_text(t),
                XmlNode::Element(e) => self.element(e),
            }
        }
    }

    fn element(&mut self, elem: &XmlElement) {
        if is_placeholder_block(elem) {
            if let Some((kind, src, alt)) = placeholder_parts(elem) {
                let marker = marker_for(self.placeholders.len() + 1);
                self.placeholders.push(Placeholder {
                    marker: marker.clone(),
                    kind,
                    src,
                    alt,
                });
                self.flush_line();
                self.lines.push(String::new());
                self.lines.push(marker);
                self.lines.push(String::new());
            }
            return;
        }

        match elem.name.as_str() {
            "head" | "script" | "style" | "desc" | "metadata" => {}
            "br" => self.flush_line(),
            "hr" => {
                self.flush_line();
                self.lines.push(String::new());
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.flush_line();
                let start = self.lines.len();
                self.walk(elem);
                self.flush_line();
                // A heading is one line, even when its markup breaks it up.
                let text = self.lines[start..].join(" ").trim().to_string();
                self.lines.truncate(start);
                if !text.is_empty() {
                    if self.first_heading.is_none() {
                        self.first_heading = Some(text.clone());
                    }
                    self.lines.push(text);
                }
                self.lines.push(String::new());
            }
            name if BLOCK_TAGS.contains(&name) => {
                self.flush_line();
                self.walk(elem);
                self.flush_line();
                self.lines.push(String::new());
            }
            // Everything else is inline content.
            _ => self.walk(elem),
        }
    }

    /// Append text, collapsing whitespace runs to single spaces.
    fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() {
                if !self.current.is_empty() && !self.current.ends_with(' ') {
                    self.current.push(' ');
                }
            } else {
                self.current.push(c);
            }
        }
    }

    fn flush_line(&mut self) {
        let line = std::mem::take(&mut self.current);
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            self.lines.push(trimmed.to_string());
        }
    }

    fn finish(mut self, language: Option<String>, fallback_title: Option<&str>) -> ChapterDoc {
        self.flush_line();

        // Collapse blank-line runs, drop leading/trailing blanks.
        let mut lines: Vec<String> = Vec::with_capacity(self.lines.len());
        for line in self.lines {
            if line.is_empty() && lines.last().is_none_or(|l| l.is_empty()) {
                continue;
            }
            lines.push(line);
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let title = self
            .first_heading
            .or_else(|| {
                lines
                    .iter()
                    .find(|l| !l.is_empty() && parse_marker(l).is_none())
                    .cloned()
            })
            .or_else(|| fallback_title.map(str::to_string))
            .unwrap_or_else(|| "Untitled".to_string());

        // Title/blank-separator invariant.
        if lines.first() != Some(&title) {
            lines.insert(0, title.clone());
        }
        if lines.len() == 1 || !lines[1].is_empty() {
            lines.insert(1, String::new());
        }

        ChapterDoc {
            title,
            language,
            body_lines: lines,
            placeholders: self.placeholders,
        }
    }
}

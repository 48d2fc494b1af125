//! Small helpers shared by the codec and the container writer.

use std::path::{Component, Path, PathBuf};

/// Escape text for inclusion in XML element content or attribute values.
pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve a general entity reference (the name between `&` and `;`).
///
/// Handles the five XML predefined entities, `&nbsp;` (common in EPUB
/// content carried over from HTML), and numeric character references.
/// Unknown names resolve to an empty string.
pub(crate) fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".into(),
        "lt" => "<".into(),
        "gt" => ">".into(),
        "quot" => "\"".into(),
        "apos" => "'".into(),
        "nbsp" => "\u{a0}".into(),
        _ => {
            if let Some(num) = name.strip_prefix('#') {
                let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    num.parse().ok()
                };
                code.and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            } else {
                String::new()
            }
        }
    }
}

/// Turn a manifest href into a safe relative path: strips `..`, `.`, and
/// empty components so extracted files can never escape the workspace.
pub(crate) fn sanitize_relative_path(href: &str, fallback: &str) -> PathBuf {
    let mut parts: Vec<&str> = Path::new(href)
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => p.to_str().filter(|s| !s.is_empty()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        parts.push(fallback);
    }
    parts.iter().collect()
}

/// The file name of `path` without its final extension.
pub(crate) fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    }
}

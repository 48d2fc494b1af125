//! Read an EPUB container into a [`Book`].

use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;
use zip::ZipArchive;

use crate::book::{Book, Item, Metadata, SpineItem, TocEntry};
use crate::error::{Error, Result};
use crate::util::resolve_entity;

/// Parsed OPF package document.
struct OpfData {
    metadata: Metadata,
    /// Manifest items in document order.
    manifest: Vec<ManifestEntry>,
    /// Spine itemrefs in reading order.
    spine: Vec<SpineItem>,
    /// Manifest id of the NCX, from the spine `toc` attribute.
    toc_id: Option<String>,
}

struct ManifestEntry {
    id: String,
    href: String,
    media_type: String,
    properties: Option<String>,
}

/// Read an EPUB file from disk into a [`Book`].
///
/// Supports EPUB 2 and 3. Extracts Dublin Core metadata, the manifest in
/// document order, the spine, and the NCX table of contents when present.
pub fn read_epub<P: AsRef<Path>>(path: P) -> Result<Book> {
    let file = std::fs::File::open(path)?;
    read_epub_from_reader(file)
}

/// Read an EPUB from any [`Read`] + [`Seek`] source.
pub fn read_epub_from_reader<R: Read + Seek>(reader: R) -> Result<Book> {
    let mut archive = ZipArchive::new(reader)?;

    let opf_path = find_opf_path(&mut archive)?;
    let opf_dir = Path::new(&opf_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let opf_content = read_archive_file(&mut archive, &opf_path)?;
    let OpfData {
        metadata,
        manifest,
        spine,
        toc_id,
    } = parse_opf(&opf_content)?;

    let mut book = Book::new();
    book.metadata = metadata;

    for entry in &manifest {
        let full_path = resolve_path(&opf_dir, &entry.href);
        match read_archive_file_bytes(&mut archive, &full_path) {
            Ok(data) => book.items.push(Item {
                id: entry.id.clone(),
                href: entry.href.clone(),
                media_type: entry.media_type.clone(),
                properties: entry.properties.clone(),
                data,
            }),
            Err(e) => {
                log::warn!("manifest item {} not readable ({}); skipping", entry.href, e);
            }
        }
    }

    for itemref in spine {
        if book.item_by_id(&itemref.idref).is_some() {
            book.spine.push(itemref);
        } else {
            log::warn!("spine itemref {} has no manifest item; skipping", itemref.idref);
        }
    }

    if let Some(toc_id) = toc_id
        && let Some(ncx) = book.item_by_id(&toc_id)
    {
        let content = String::from_utf8_lossy(strip_bom(&ncx.data)).to_string();
        match parse_ncx(&content) {
            Ok(toc) => book.toc = toc,
            Err(e) => log::warn!("failed to parse NCX: {}", e),
        }
    }

    Ok(book)
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let container = read_archive_file(archive, "META-INF/container.xml")?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8(attr.value.to_vec())?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

fn parse_opf(content: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);

    let mut metadata = Metadata::default();
    let mut manifest: Vec<ManifestEntry> = Vec::new();
    let mut spine: Vec<SpineItem> = Vec::new();
    let mut toc_id: Option<String> = None;

    let mut in_metadata = false;
    let mut current_element: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader.read_event();
        match event {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                let is_empty = matches!(&event, Ok(Event::Empty(_)));

                match local {
                    b"metadata" => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" if in_metadata => {
                        if !is_empty {
                            current_element = Some(match local {
                                b"title" => "title",
                                b"creator" => "creator",
                                b"language" => "language",
                                _ => "identifier",
                            });
                            buf_text.clear();
                        }
                    }
                    b"spine" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"toc" {
                                toc_id = Some(String::from_utf8(attr.value.to_vec())?);
                            }
                        }
                    }
                    b"item" => {
                        let mut id = String::new();
                        let mut href = String::new();
                        let mut media_type = String::new();
                        let mut properties = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"id" => id = String::from_utf8(attr.value.to_vec())?,
                                b"href" => href = String::from_utf8(attr.value.to_vec())?,
                                b"media-type" => {
                                    media_type = String::from_utf8(attr.value.to_vec())?
                                }
                                b"properties" => {
                                    properties = Some(String::from_utf8(attr.value.to_vec())?)
                                }
                                _ => {}
                            }
                        }
                        if !id.is_empty() && !href.is_empty() {
                            manifest.push(ManifestEntry {
                                id,
                                href,
                                media_type,
                                properties,
                            });
                        }
                    }
                    b"itemref" => {
                        let mut idref = String::new();
                        let mut linear = true;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"idref" => idref = String::from_utf8(attr.value.to_vec())?,
                                b"linear" => linear = attr.value.as_ref() != b"no",
                                _ => {}
                            }
                        }
                        if !idref.is_empty() {
                            spine.push(SpineItem { idref, linear });
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if let Some(elem) = current_element {
                    // Raw text accumulated across entity references; trim
                    // only here so internal spaces survive.
                    let text = buf_text.trim().to_string();
                    match elem {
                        "title" => metadata.title = text,
                        "creator" => metadata.authors.push(text),
                        "language" => metadata.language = text,
                        "identifier" => {
                            if metadata.identifier.is_empty() {
                                metadata.identifier = text;
                            }
                        }
                        _ => {}
                    }
                    current_element = None;
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Ok(OpfData {
        metadata,
        manifest,
        spine,
        toc_id,
    })
}

fn parse_ncx(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);

    struct NavPoint {
        children: Vec<TocEntry>,
        title: Option<String>,
        src: Option<String>,
    }

    let mut stack: Vec<NavPoint> = vec![NavPoint {
        children: Vec::new(),
        title: None,
        src: None,
    }];
    let mut in_text = false;
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"navPoint" => stack.push(NavPoint {
                    children: Vec::new(),
                    title: None,
                    src: None,
                }),
                b"text" => {
                    in_text = true;
                    text_buf.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == b"content" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"src"
                            && let Some(point) = stack.last_mut()
                        {
                            point.src = Some(String::from_utf8(attr.value.to_vec())?);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_text {
                    text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text {
                    text_buf.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
                }
            }
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"text" => {
                    in_text = false;
                    // The label trims at the edges only; entity references
                    // inside keep their surrounding spaces.
                    let label = text_buf.trim();
                    if !label.is_empty()
                        && let Some(point) = stack.last_mut()
                        && point.title.is_none()
                    {
                        point.title = Some(label.to_string());
                    }
                }
                b"navPoint" => {
                    if let Some(point) = stack.pop()
                        && let (Some(title), Some(src)) = (point.title, point.src)
                    {
                        let mut entry = TocEntry::new(title, src);
                        entry.children = point.children;
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Ok(stack.pop().map(|p| p.children).unwrap_or_default())
}

fn read_archive_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String> {
    let bytes = read_archive_file_bytes(archive, path)?;
    Ok(String::from_utf8(strip_bom(&bytes).to_vec())?)
}

fn read_archive_file_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Some EPUBs percent-encode manifest hrefs but store the decoded name.
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::InvalidEpub(format!("Invalid UTF-8 in path: {}", path)))?;

    let mut file = archive.by_name(&decoded)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Strip a UTF-8 byte order mark if present.
fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(data)
}

fn resolve_path(base: &str, href: &str) -> String {
    if base.is_empty() {
        href.to_string()
    } else {
        format!("{}/{}", base, href)
    }
}

/// Local part of a potentially namespaced XML name.
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

//! Write a [`Book`] back out as an EPUB container.

use std::io::{Seek, Write};
use std::path::Path;

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::book::{Book, TocEntry};
use crate::error::Result;
use crate::util::escape_xml;

/// Write a [`Book`] to an EPUB file on disk.
///
/// Produces an EPUB 2 container: OPF package document and NCX table of
/// contents are regenerated from the book's metadata; every item is
/// packaged under `OEBPS/` with its manifest id and href preserved.
pub fn write_epub<P: AsRef<Path>>(book: &Book, path: P) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_epub_to_writer(book, file)
}

/// Write a [`Book`] to any [`Write`] + [`Seek`] destination.
pub fn write_epub_to_writer<W: Write + Seek>(book: &Book, writer: W) -> Result<()> {
    let mut zip = ZipWriter::new(writer);

    let options_stored =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let options_deflate =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    // The mimetype entry must come first and be uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(b"application/epub+zip")?;

    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;

    // One identifier shared by OPF and NCX.
    let identifier = if book.metadata.identifier.is_empty() {
        generated_identifier()
    } else {
        book.metadata.identifier.clone()
    };

    zip.start_file("OEBPS/content.opf", options_deflate)?;
    zip.write_all(generate_opf(book, &identifier).as_bytes())?;

    zip.start_file("OEBPS/toc.ncx", options_deflate)?;
    zip.write_all(generate_ncx(book, &identifier).as_bytes())?;

    for item in &book.items {
        // These two are regenerated above.
        if item.href == "toc.ncx" || item.href == "content.opf" {
            continue;
        }
        zip.start_file(format!("OEBPS/{}", item.href), options_deflate)?;
        zip.write_all(&item.data)?;
    }

    zip.finish()?;
    Ok(())
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

fn generate_opf(book: &Book, identifier: &str) -> String {
    let mut opf = String::new();

    opf.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
"#,
    );

    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(&book.metadata.title)
    ));
    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(identifier)
    ));
    let language = if book.metadata.language.is_empty() {
        "en"
    } else {
        &book.metadata.language
    };
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(language)
    ));
    for author in &book.metadata.authors {
        opf.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            escape_xml(author)
        ));
    }

    opf.push_str("  </metadata>\n  <manifest>\n");
    opf.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
    );
    for item in &book.items {
        if item.href == "toc.ncx" || item.href == "content.opf" {
            continue;
        }
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            escape_xml(&item.id),
            escape_xml(&item.href),
            escape_xml(&item.media_type)
        ));
    }

    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for entry in &book.spine {
        if entry.linear {
            opf.push_str(&format!(
                "    <itemref idref=\"{}\"/>\n",
                escape_xml(&entry.idref)
            ));
        } else {
            opf.push_str(&format!(
                "    <itemref idref=\"{}\" linear=\"no\"/>\n",
                escape_xml(&entry.idref)
            ));
        }
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

fn generate_ncx(book: &Book, identifier: &str) -> String {
    let mut ncx = String::new();

    ncx.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content=""#,
    );
    ncx.push_str(&escape_xml(identifier));
    ncx.push_str(
        r#""/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>"#,
    );
    ncx.push_str(&escape_xml(&book.metadata.title));
    ncx.push_str(
        r#"</text>
  </docTitle>
  <navMap>
"#,
    );

    let mut play_order = 1;
    for entry in &book.toc {
        write_nav_point(&mut ncx, entry, &mut play_order, 2);
    }

    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}

fn write_nav_point(ncx: &mut String, entry: &TocEntry, play_order: &mut usize, indent: usize) {
    let pad = "  ".repeat(indent);

    ncx.push_str(&format!(
        "{pad}<navPoint id=\"navpoint-{0}\" playOrder=\"{0}\">\n",
        play_order
    ));
    ncx.push_str(&format!(
        "{pad}  <navLabel>\n{pad}    <text>{}</text>\n{pad}  </navLabel>\n",
        escape_xml(&entry.title)
    ));
    ncx.push_str(&format!(
        "{pad}  <content src=\"{}\"/>\n",
        escape_xml(&entry.href)
    ));

    *play_order += 1;
    for child in &entry.children {
        write_nav_point(ncx, child, play_order, indent + 1);
    }

    ncx.push_str(&format!("{pad}</navPoint>\n"));
}

/// Time-seeded urn:uuid identifier for books that never had one. Not
/// cryptographically random; only needs to be unique enough for a package id.
fn generated_identifier() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);

    let mut state = seed | 1;
    let mut bytes = [0u8; 16];
    for b in &mut bytes {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *b = (state >> 56) as u8;
    }
    // UUID version 4, variant 2
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "urn:uuid:{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}

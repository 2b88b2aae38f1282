//! EPUB container access.
//!
//! An EPUB is a zip with a well-known layout: `META-INF/container.xml`
//! names the OPF package document, the OPF manifest maps ids to
//! sub-document paths, and its spine gives reading order. This module walks
//! that chain and extracts readable text blocks with their element paths
//! and ids, which is everything the index needs for locator anchors and
//! fragment lookups.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;
use zip::ZipArchive;

use crate::ebook::types::EbookError;

/// A contiguous text block extracted from one sub-document.
#[derive(Debug, Clone)]
pub struct TextBlock {
    /// Element path inside the sub-document, e.g. `body/p[12]`.
    pub element_path: String,
    /// The `id` attribute of the block element, when present.
    pub id: Option<String>,
    pub text: String,
}

/// Read access to one EPUB file on disk.
///
/// The archive is reopened per operation; concurrent readers of the same
/// file are then safe and the container holds no open handles between
/// reconciliation cycles.
#[derive(Debug, Clone)]
pub struct EpubContainer {
    path: PathBuf,
}

impl EpubContainer {
    /// Open and validate the container layout.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EbookError> {
        let path = path.into();
        let mut archive = ZipArchive::new(File::open(&path)?)?;
        if archive.by_name("META-INF/container.xml").is_err() {
            return Err(EbookError::Container(format!(
                "{} has no META-INF/container.xml",
                path.display()
            )));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn archive(&self) -> Result<ZipArchive<File>, EbookError> {
        Ok(ZipArchive::new(File::open(&self.path)?)?)
    }

    /// Spine sub-document paths in reading order.
    pub fn spine_documents(&self) -> Result<Vec<String>, EbookError> {
        let container = self.read_entry("META-INF/container.xml")?;
        let opf_path = rootfile_path(&container)?;
        let opf = self.read_entry(&opf_path)?;
        let base = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        parse_spine(&opf, base)
    }

    /// Read a sub-document, tolerating locators whose path prefix differs
    /// from the container layout (a partial suffix match is accepted).
    pub fn read_document(&self, href: &str) -> Result<String, EbookError> {
        if let Ok(text) = self.read_entry(href) {
            return Ok(text);
        }
        let archive = self.archive()?;
        let resolved = archive
            .file_names()
            .find(|name| name.ends_with(href) || name.contains(href))
            .map(String::from);
        match resolved {
            Some(name) => {
                debug!(requested = href, resolved = %name, "sub-document path resolved by suffix");
                self.read_entry(&name)
            }
            None => Err(EbookError::Container(format!(
                "sub-document {href} not found in container"
            ))),
        }
    }

    /// Text blocks of one sub-document, in document order.
    pub fn text_blocks(&self, href: &str) -> Result<Vec<TextBlock>, EbookError> {
        let markup = self.read_document(href)?;
        extract_blocks(&markup)
    }

    /// Concatenated descendant text of the element carrying `fragment_id`,
    /// trimmed. `None` when the id does not occur in the sub-document.
    pub fn fragment_text(
        &self,
        href: &str,
        fragment_id: &str,
    ) -> Result<Option<String>, EbookError> {
        let markup = self.read_document(href)?;
        extract_fragment(&markup, fragment_id)
    }

    fn read_entry(&self, name: &str) -> Result<String, EbookError> {
        let mut archive = self.archive()?;
        let mut entry = archive.by_name(name)?;
        let mut raw = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut raw)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

/// Pull the OPF path out of container.xml.
fn rootfile_path(container_xml: &str) -> Result<String, EbookError> {
    let mut reader = Reader::from_str(container_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e)
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr(&e, "full-path") {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Err(EbookError::Container(
        "container.xml names no rootfile".to_string(),
    ))
}

/// Parse the OPF package document: manifest id -> href, then spine order.
fn parse_spine(opf_xml: &str, base: &str) -> Result<Vec<String>, EbookError> {
    let mut manifest: HashMap<String, (String, Option<String>)> = HashMap::new();
    let mut spine_ids: Vec<String> = Vec::new();

    let mut reader = Reader::from_str(opf_xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, "id"), attr(&e, "href")) {
                        manifest.insert(id, (href, attr(&e, "media-type")));
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, "idref") {
                        spine_ids.push(idref);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let docs = spine_ids
        .iter()
        .filter_map(|id| manifest.get(id))
        .filter(|(href, media_type)| is_document(href, media_type.as_deref()))
        .map(|(href, _)| join_href(base, href))
        .collect::<Vec<_>>();
    if docs.is_empty() {
        return Err(EbookError::Container(
            "spine references no readable sub-documents".to_string(),
        ));
    }
    Ok(docs)
}

fn is_document(href: &str, media_type: Option<&str>) -> bool {
    if let Some(mt) = media_type {
        return mt.contains("html");
    }
    href.ends_with(".xhtml") || href.ends_with(".html") || href.ends_with(".htm")
}

fn join_href(base: &str, href: &str) -> String {
    let href = href.strip_prefix("./").unwrap_or(href);
    if base.is_empty() {
        href.to_string()
    } else {
        format!("{base}/{href}")
    }
}

fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

/// Tags whose text forms one block in the linearization.
fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "li"
            | "blockquote"
            | "pre"
            | "dt"
            | "dd"
            | "td"
            | "th"
            | "figcaption"
            | "caption"
    )
}

fn is_skipped_tag(tag: &str) -> bool {
    matches!(tag, "head" | "script" | "style")
}

struct Frame {
    tag: String,
    index: usize,
    children: HashMap<String, usize>,
}

fn path_of(frames: &[Frame]) -> String {
    let body_pos = frames.iter().position(|f| f.tag == "body");
    let relevant = match body_pos {
        Some(pos) => &frames[pos..],
        None => frames,
    };
    let mut parts = Vec::with_capacity(relevant.len());
    for (i, frame) in relevant.iter().enumerate() {
        if i == 0 {
            parts.push(frame.tag.clone());
        } else {
            parts.push(format!("{}[{}]", frame.tag, frame.index));
        }
    }
    parts.join("/")
}

/// Stream a sub-document and collect its text blocks.
///
/// Block-level elements open a block; text between blocks is attached to an
/// implicit block at its parent path so nothing readable is dropped.
fn extract_blocks(markup: &str) -> Result<Vec<TextBlock>, EbookError> {
    let mut reader = Reader::from_str(markup);

    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut frames: Vec<Frame> = Vec::new();
    let mut current: Option<(TextBlock, usize)> = None;
    let mut skip_depth = 0usize;

    let close_current = |current: &mut Option<(TextBlock, usize)>,
                         blocks: &mut Vec<TextBlock>| {
        if let Some((block, _)) = current.take() {
            if !block.text.trim().is_empty() {
                blocks.push(block);
            }
        }
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let index = next_child_index(&mut frames, &tag);
                frames.push(Frame {
                    tag: tag.clone(),
                    index,
                    children: HashMap::new(),
                });
                if skip_depth > 0 {
                    skip_depth += 1;
                    continue;
                }
                if is_skipped_tag(&tag) {
                    skip_depth = 1;
                    continue;
                }
                if is_block_tag(&tag) {
                    close_current(&mut current, &mut blocks);
                    current = Some((
                        TextBlock {
                            element_path: path_of(&frames),
                            id: attr(&e, "id"),
                            text: String::new(),
                        },
                        frames.len(),
                    ));
                }
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                next_child_index(&mut frames, &tag);
            }
            Event::Text(t) => {
                if skip_depth > 0 {
                    continue;
                }
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                if text.trim().is_empty() {
                    // inter-element whitespace still separates words
                    if let Some((block, _)) = current.as_mut() {
                        if !block.text.is_empty() && !block.text.ends_with(' ') {
                            block.text.push(' ');
                        }
                    }
                    continue;
                }
                match current.as_mut() {
                    Some((block, _)) => block.text.push_str(&text),
                    None => {
                        current = Some((
                            TextBlock {
                                element_path: path_of(&frames),
                                id: None,
                                text,
                            },
                            frames.len(),
                        ));
                    }
                }
            }
            Event::End(_) => {
                frames.pop();
                if skip_depth > 0 {
                    skip_depth -= 1;
                }
                if let Some((_, depth)) = &current {
                    if frames.len() < *depth {
                        close_current(&mut current, &mut blocks);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    close_current(&mut current, &mut blocks);
    Ok(blocks)
}

fn next_child_index(frames: &mut [Frame], tag: &str) -> usize {
    match frames.last_mut() {
        Some(parent) => {
            let n = parent.children.entry(tag.to_string()).or_insert(0);
            *n += 1;
            *n
        }
        None => 1,
    }
}

/// Find the element with `fragment_id` and return its descendant text.
fn extract_fragment(markup: &str, fragment_id: &str) -> Result<Option<String>, EbookError> {
    let mut reader = Reader::from_str(markup);

    let mut depth = 0usize;
    let mut capture_depth: Option<usize> = None;
    let mut out = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                if capture_depth.is_none()
                    && attr(&e, "id").as_deref() == Some(fragment_id)
                {
                    capture_depth = Some(depth);
                }
            }
            Event::Empty(e) => {
                if capture_depth.is_none()
                    && attr(&e, "id").as_deref() == Some(fragment_id)
                {
                    // an empty element carries no text
                    return Ok(None);
                }
            }
            Event::Text(t) => {
                if capture_depth.is_some() {
                    let text = t
                        .unescape()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                    if text.trim().is_empty() {
                        if !out.is_empty() && !out.ends_with(' ') {
                            out.push(' ');
                        }
                    } else {
                        out.push_str(&text);
                    }
                }
            }
            Event::End(_) => {
                if capture_depth == Some(depth) {
                    let trimmed = out.trim();
                    return if trimmed.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(trimmed.to_string()))
                    };
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Chapter One</title><style>p { margin: 0 }</style></head>
<body>
  <h1 id="c1">Chapter One</h1>
  <p>It was the best of times, it was the worst of times.</p>
  <p><span id="s001-sentence2">It was the age of wisdom,</span>
     <span id="s001-sentence3">it was the age of foolishness.</span></p>
</body>
</html>"#;

    #[test]
    fn blocks_carry_paths_and_ids() {
        let blocks = extract_blocks(CHAPTER).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].element_path, "body/h1[1]");
        assert_eq!(blocks[0].id.as_deref(), Some("c1"));
        assert_eq!(blocks[1].element_path, "body/p[1]");
        assert!(blocks[1].text.contains("best of times"));
        assert_eq!(blocks[2].element_path, "body/p[2]");
        assert!(blocks[2].text.contains("age of wisdom"));
        assert!(blocks[2].text.contains("age of foolishness"));
    }

    #[test]
    fn head_content_is_not_indexed() {
        let blocks = extract_blocks(CHAPTER).unwrap();
        assert!(blocks.iter().all(|b| !b.text.contains("margin")));
        assert!(blocks.iter().all(|b| !b.text.contains("Chapter One") || b.id.is_some()));
    }

    #[test]
    fn fragment_lookup_returns_descendant_text() {
        let text = extract_fragment(CHAPTER, "s001-sentence3").unwrap().unwrap();
        assert_eq!(text, "it was the age of foolishness.");
    }

    #[test]
    fn fragment_lookup_spans_children() {
        let text = extract_fragment(CHAPTER, "c1").unwrap().unwrap();
        assert_eq!(text, "Chapter One");
    }

    #[test]
    fn unknown_fragment_is_none() {
        assert!(extract_fragment(CHAPTER, "nope").unwrap().is_none());
    }

    #[test]
    fn spine_parses_manifest_order() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="c1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="c2"/>
  </spine>
</package>"#;
        let docs = parse_spine(opf, "OPS").unwrap();
        assert_eq!(docs, vec!["OPS/text/ch1.xhtml", "OPS/text/ch2.xhtml"]);
    }

    #[test]
    fn rootfile_is_located() {
        let xml = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(rootfile_path(xml).unwrap(), "OPS/content.opf");
    }
}

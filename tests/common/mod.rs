//! Shared helpers for integration tests: synthetic EPUBs and story text.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use abridge::transcript::{Segment, TranscriptIndex};

/// Write a minimal but structurally real EPUB: container.xml, an OPF with a
/// spine, and the given `(href, xhtml)` chapters.
pub fn write_epub(dir: &Path, name: &str, chapters: &[(&str, String)]) -> PathBuf {
    let path = dir.join(name);
    let file = std::fs::File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    zip.start_file("META-INF/container.xml", options).unwrap();
    zip.write_all(
        br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#,
    )
    .unwrap();

    let mut manifest = String::new();
    let mut spine = String::new();
    for (i, (href, _)) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            "<item id=\"c{i}\" href=\"{href}\" media-type=\"application/xhtml+xml\"/>"
        ));
        spine.push_str(&format!("<itemref idref=\"c{i}\"/>"));
    }
    zip.start_file("OPS/content.opf", options).unwrap();
    zip.write_all(
        format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>{manifest}</manifest>
  <spine>{spine}</spine>
</package>"#
        )
        .as_bytes(),
    )
    .unwrap();

    for (href, body) in chapters {
        zip.start_file(format!("OPS/{href}"), options).unwrap();
        zip.write_all(
            format!(
                r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>chapter</title></head>
<body>{body}</body></html>"#
            )
            .as_bytes(),
        )
        .unwrap();
    }
    zip.finish().unwrap();
    path
}

const VOCABULARY: &[&str] = &[
    "harbor", "violet", "copper", "lantern", "meadow", "thunder", "willow", "ember",
    "granite", "sparrow", "cellar", "ribbon", "anchor", "bramble", "chimney", "dusk",
    "fiddle", "glacier", "hollow", "ivory", "juniper", "kettle", "ledger", "marble",
    "nettle", "orchard", "pebble", "quarry", "russet", "saddle", "timber", "umber",
    "velvet", "walnut", "yarrow", "zephyr", "beacon", "cinder", "drift", "estuary",
    "falcon", "gorse", "heather", "inlet", "jetty", "knoll", "loam", "mire",
    "northward", "oakum", "pillar", "quay", "reed", "shale", "tarn", "under",
    "vane", "wharf", "axle", "brook", "crest", "dale", "eaves", "ford",
];

/// A long stream of lexically distinct sentences, used as both the book
/// text and the narration.
pub fn story_sentences(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let word = |j: usize| VOCABULARY[(i * 31 + j * 17 + i * i % 13) % VOCABULARY.len()];
            format!(
                "The {} near the {} kept a {} while the {} turned to {} beyond the {} and the {} settled over the {}.",
                word(1), word(2), word(3), word(4), word(5), word(6), word(7), word(8)
            )
        })
        .collect()
}

/// Narration of the sentences, grouped into fixed-size transcript segments
/// `seconds_per_segment` apart.
pub fn narrate(
    sentences: &[String],
    per_segment: usize,
    seconds_per_segment: f64,
) -> TranscriptIndex {
    let segments = sentences
        .chunks(per_segment)
        .enumerate()
        .map(|(i, chunk)| Segment {
            start_time: i as f64 * seconds_per_segment,
            end_time: (i + 1) as f64 * seconds_per_segment,
            text: chunk.join(" "),
        })
        .collect();
    TranscriptIndex::from_segments(segments).unwrap()
}

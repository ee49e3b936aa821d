use crate::error::IngestError;
use crate::models::FormatTag;
use regex::{Captures, Regex};
use std::io::Read;

/// Maximum decompressed bytes read from a single zip entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Format-specific text extractor. One variant per supported format; adding a
/// format means adding a variant.
#[derive(Debug, Clone)]
pub enum Extractor {
    Pdf(PdfExtractor),
    PlainText,
    Docx,
    Html,
    Markdown,
}

impl Extractor {
    pub fn for_format(format: FormatTag) -> Self {
        match format {
            FormatTag::Pdf => Self::Pdf(PdfExtractor::default()),
            FormatTag::PlainText => Self::PlainText,
            FormatTag::Docx => Self::Docx,
            FormatTag::Html => Self::Html,
            FormatTag::Markdown => Self::Markdown,
        }
    }

    pub fn format(&self) -> FormatTag {
        match self {
            Self::Pdf(_) => FormatTag::Pdf,
            Self::PlainText => FormatTag::PlainText,
            Self::Docx => FormatTag::Docx,
            Self::Html => FormatTag::Html,
            Self::Markdown => FormatTag::Markdown,
        }
    }

    /// Returns raw extracted text; cleanup is the normalizer's job.
    pub fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String, IngestError> {
        match self {
            Self::Pdf(pdf) => pdf.extract(filename, bytes),
            Self::PlainText => decode_text(filename, bytes),
            Self::Docx => docx_text(bytes).map_err(|reason| extraction(filename, reason)),
            Self::Html => {
                let html = decode_text(filename, bytes)?;
                Ok(html_to_text(&html)?)
            }
            Self::Markdown => {
                let markdown = decode_text(filename, bytes)?;
                Ok(strip_markdown(&markdown)?)
            }
        }
    }
}

fn extraction(filename: &str, reason: impl Into<String>) -> IngestError {
    IngestError::Extraction {
        filename: filename.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfStrategy {
    Lopdf,
    PdfExtract,
}

impl PdfStrategy {
    pub fn name(self) -> &'static str {
        match self {
            Self::Lopdf => "lopdf",
            Self::PdfExtract => "pdf-extract",
        }
    }

    fn run(self, bytes: &[u8]) -> Result<String, String> {
        let text = match self {
            Self::Lopdf => lopdf_text(bytes)?,
            Self::PdfExtract => {
                pdf_extract::extract_text_from_mem(bytes).map_err(|error| error.to_string())?
            }
        };

        if text.trim().is_empty() {
            return Err("pdf had no readable text".to_string());
        }

        Ok(text)
    }
}

/// Tries each strategy in order and keeps the first non-empty result.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    pub strategies: Vec<PdfStrategy>,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            strategies: vec![PdfStrategy::Lopdf, PdfStrategy::PdfExtract],
        }
    }
}

impl PdfExtractor {
    pub fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String, IngestError> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.run(bytes) {
                Ok(text) => return Ok(text),
                Err(reason) => {
                    tracing::debug!(
                        filename,
                        strategy = strategy.name(),
                        %reason,
                        "pdf strategy failed"
                    );
                    failures.push(format!("{}: {reason}", strategy.name()));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no pdf strategies configured".to_string());
        }

        Err(extraction(filename, failures.join("; ")))
    }
}

fn lopdf_text(bytes: &[u8]) -> Result<String, String> {
    let document = lopdf::Document::load_mem(bytes).map_err(|error| error.to_string())?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| error.to_string())?;

        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    Ok(pages.join("\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1252,
    Latin1,
}

impl TextEncoding {
    /// Order in which plain-text decoding is attempted.
    pub const ATTEMPT_ORDER: [TextEncoding; 3] = [
        TextEncoding::Utf8,
        TextEncoding::Windows1252,
        TextEncoding::Latin1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Windows1252 => "windows-1252",
            Self::Latin1 => "iso-8859-1",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => {
                let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
                std::str::from_utf8(body).ok().map(str::to_string)
            }
            Self::Windows1252 => bytes.iter().map(|byte| windows_1252_char(*byte)).collect(),
            Self::Latin1 => Some(bytes.iter().map(|byte| char::from(*byte)).collect()),
        }
    }
}

fn windows_1252_char(byte: u8) -> Option<char> {
    const HIGH: [Option<char>; 32] = [
        Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
        Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
        Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
        Some('\u{0152}'), None, Some('\u{017D}'), None,
        None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
        Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
        Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
        Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
    ];

    match byte {
        0x80..=0x9F => HIGH[usize::from(byte - 0x80)],
        _ => Some(char::from(byte)),
    }
}

pub fn decode_text(filename: &str, bytes: &[u8]) -> Result<String, IngestError> {
    TextEncoding::ATTEMPT_ORDER
        .iter()
        .find_map(|encoding| encoding.decode(bytes))
        .ok_or_else(|| IngestError::Decode {
            filename: filename.to_string(),
            attempted: TextEncoding::ATTEMPT_ORDER
                .iter()
                .map(|encoding| encoding.name())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

fn docx_text(bytes: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|error| error.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|error| format!("word/document.xml: {error}"))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|error| error.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text_run = false;
    let mut out = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"t" => {
                in_text_run = true;
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(element))
                if matches!(element.local_name().as_ref(), b"tab" | b"br") =>
            {
                out.push(' ');
            }
            Ok(Event::Text(text)) if in_text_run => {
                let unescaped = text.unescape().map_err(|error| error.to_string())?;
                out.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(error.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Drops script/style blocks and comments, strips tags and decodes entities.
pub fn html_to_text(html: &str) -> Result<String, regex::Error> {
    let blocks = Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->")?;
    let tags = Regex::new(r"(?s)<[^>]*>")?;

    let without_blocks = blocks.replace_all(html, " ");
    let text = tags.replace_all(&without_blocks, " ");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> Result<String, regex::Error> {
    let numeric = Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);")?;
    let decoded = numeric.replace_all(text, |captures: &Captures| {
        let raw = &captures[1];
        let code = match raw.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse::<u32>().ok(),
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });

    Ok(decoded
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&"))
}

/// Removes heading markers, emphasis, inline code and link targets.
pub fn strip_markdown(markdown: &str) -> Result<String, regex::Error> {
    let rules = [
        (r"(?m)^#+\s*", ""),
        (r"\*\*(.*?)\*\*", "$1"),
        (r"\*(.*?)\*", "$1"),
        (r"`(.*?)`", "$1"),
        (r"\[([^\]]+)\]\([^)]+\)", "$1"),
    ];

    let mut text = markdown.to_string();
    for (pattern, replacement) in rules {
        text = Regex::new(pattern)?
            .replace_all(&text, replacement)
            .into_owned();
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .expect("start zip entry");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write zip entry");
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn utf8_is_tried_first_and_bom_is_dropped() {
        let text = decode_text("a.txt", "\u{feff}caf\u{e9}".as_bytes()).expect("utf-8 text");
        assert_eq!(text, "caf\u{e9}");
    }

    #[test]
    fn windows_1252_quotes_decode() {
        let text = decode_text("a.txt", &[0x93, b'h', b'i', 0x94]).expect("cp1252 text");
        assert_eq!(text, "\u{201C}hi\u{201D}");
    }

    #[test]
    fn undefined_windows_1252_bytes_fall_back_to_latin1() {
        assert_eq!(TextEncoding::Windows1252.decode(&[b'a', 0x81]), None);
        let text = decode_text("a.txt", &[b'a', 0x81]).expect("latin-1 text");
        assert_eq!(text, "a\u{81}");
    }

    #[test]
    fn html_drops_scripts_styles_and_tags() -> Result<(), regex::Error> {
        let html = "<html><head><style>p { color: red; }</style>\
                    <script type=\"text/javascript\">var x = 1;</script></head>\
                    <body><p>Fish &amp; chips</p><!-- hidden --><p>cost &#36;5</p></body></html>";
        let text = html_to_text(html)?;
        assert!(text.contains("Fish & chips"));
        assert!(text.contains("cost $5"));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains('<'));
        Ok(())
    }

    #[test]
    fn markdown_formatting_is_removed() -> Result<(), regex::Error> {
        let markdown = "# Title\n\nSome **bold** and *italic* with `code` and [a link](https://example.com).";
        let text = strip_markdown(markdown)?;
        assert_eq!(
            text,
            "Title\n\nSome bold and italic with code and a link."
        );
        Ok(())
    }

    #[test]
    fn docx_runs_are_joined_per_paragraph() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let text = Extractor::Docx
            .extract("a.docx", &docx_bytes(xml))
            .expect("docx text");
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second & last"));
    }

    #[test]
    fn docx_without_document_part_is_an_extraction_error() {
        let result = Extractor::Docx.extract("broken.docx", b"not a zip archive");
        assert!(matches!(
            result,
            Err(IngestError::Extraction { filename, .. }) if filename == "broken.docx"
        ));
    }

    #[test]
    fn broken_pdf_reports_every_strategy() {
        let result = Extractor::for_format(FormatTag::Pdf).extract("bad.pdf", b"%PDF-1.4\n%broken");
        match result {
            Err(IngestError::Extraction { filename, reason }) => {
                assert_eq!(filename, "bad.pdf");
                assert!(reason.contains("lopdf"));
                assert!(reason.contains("pdf-extract"));
            }
            other => panic!("expected extraction error, got {other:?}"),
        }
    }

    #[test]
    fn every_format_maps_to_its_extractor() {
        for format in FormatTag::ALL {
            assert_eq!(Extractor::for_format(format).format(), format);
        }
    }
}


use std::sync::LazyLock;

use fancy_regex::Regex;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use scraper::Html;
use tracing::debug;

use crate::store::models::DocumentFormat;
use crate::{RagError, Result};

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]\s*$").expect("sentence regex is valid"));
static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("space regex is valid"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("newline regex is valid"));

const CSV_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Extensions we recognise but cannot extract in-process
const BINARY_OFFICE_FORMATS: [&str; 5] = ["pdf", "docx", "doc", "xlsx", "xls"];

/// Plain text pulled out of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub format: DocumentFormat,
    pub text: String,
}

/// Turns raw file bytes into plain text
pub trait TextExtractor: Send + Sync {
    /// `format_hint` is a file name or a bare extension
    fn extract(&self, bytes: &[u8], format_hint: &str) -> Result<ExtractedText>;
}

/// Extractor for the text-based formats we support in-process
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatExtractor;

impl TextExtractor for FormatExtractor {
    fn extract(&self, bytes: &[u8], format_hint: &str) -> Result<ExtractedText> {
        let extension = hint_extension(format_hint);
        let Some(format) = DocumentFormat::from_extension(&extension) else {
            if BINARY_OFFICE_FORMATS.contains(&extension.as_str()) {
                return Err(RagError::UnsupportedFormat(format!(
                    ".{} files must be converted to text before ingestion",
                    extension
                )));
            }
            return Err(RagError::UnsupportedFormat(format!(
                "'{}' (supported: .txt, .md, .html, .csv)",
                format_hint
            )));
        };

        let decoded = decode_text(bytes)?;
        let text = match format {
            DocumentFormat::Text => normalize_text(&decoded),
            DocumentFormat::Markdown => normalize_text(&markdown_to_text(&decoded)),
            DocumentFormat::Html => normalize_text(&html_to_text(&decoded)),
            // Rows stay one per line so chunk boundaries fall between records
            DocumentFormat::Csv => csv_to_text(&decoded)?,
        };

        debug!(
            "Extracted {} characters of {} text",
            text.chars().count(),
            format
        );
        Ok(ExtractedText { format, text })
    }
}

fn hint_extension(format_hint: &str) -> String {
    let hint = format_hint.trim();
    let extension = match hint.rsplit_once('.') {
        Some((_, extension)) => extension,
        None => hint,
    };
    extension.to_ascii_lowercase()
}

/// UTF-8 first, falling back to Latin-1. NUL bytes mark binary content.
fn decode_text(bytes: &[u8]) -> Result<String> {
    if bytes.contains(&0) {
        return Err(RagError::CorruptFile(
            "file contains binary data".to_string(),
        ));
    }

    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Ok(text),
        Err(_) => {
            debug!("Content is not valid UTF-8, decoding as Latin-1");
            Ok(bytes.iter().copied().map(char::from).collect())
        }
    }
}

fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::Start(Tag::Item) => text.push_str("- "),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::TableRow,
            ) => text.push_str("\n\n"),
            Event::End(TagEnd::TableCell) => text.push_str(" | "),
            _ => {}
        }
    }

    text
}

fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let mut parts = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|element| {
                matches!(element.name(), "script" | "style" | "noscript" | "head")
            })
        });
        let trimmed = text.trim();
        if !hidden && !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }

    parts.join("\n")
}

fn csv_to_text(content: &str) -> Result<String> {
    let mut best: Option<(csv::StringRecord, Vec<csv::StringRecord>)> = None;

    for delimiter in CSV_DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(content.as_bytes());

        let Ok(headers) = reader.headers().cloned() else {
            continue;
        };
        let Ok(rows) = reader.records().collect::<std::result::Result<Vec<_>, _>>() else {
            continue;
        };

        let columns = headers.len();
        if columns > 1 {
            best = Some((headers, rows));
            break;
        }
        if best.is_none() {
            best = Some((headers, rows));
        }
    }

    let Some((headers, rows)) = best else {
        return Err(RagError::CorruptFile("could not parse CSV".to_string()));
    };
    if headers.iter().all(|h| h.trim().is_empty()) && rows.is_empty() {
        return Err(RagError::CorruptFile("CSV file has no data".to_string()));
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format!(
        "Columns: {}",
        headers.iter().collect::<Vec<_>>().join(" | ")
    ));

    for (number, row) in rows.iter().enumerate() {
        let cells: Vec<String> = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(column, value)| format!("{}: {}", column, value.trim()))
            .collect();
        if !cells.is_empty() {
            lines.push(format!("Row {}: {}", number + 1, cells.join(" | ")));
        }
    }

    Ok(lines.join("\n"))
}

fn ends_sentence(line: &str) -> bool {
    SENTENCE_END.is_match(line).unwrap_or(false)
}

fn starts_uppercase(line: &str) -> bool {
    line.chars().next().is_some_and(char::is_uppercase)
}

/// Normalize extracted text for chunking and embedding.
///
/// Lines are re-flowed: a line joins the previous one unless the previous
/// line ends a sentence and this one starts with a capital letter, in which
/// case a paragraph break separates them. Runs of spaces and tabs collapse
/// to one space.
#[inline]
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if current.is_empty() {
            current.push_str(line);
        } else if ends_sentence(&current) && starts_uppercase(line) {
            paragraphs.push(std::mem::take(&mut current));
            current.push_str(line);
        } else {
            current.push(' ');
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    let joined = paragraphs.join("\n\n");
    let collapsed = HORIZONTAL_SPACE.replace_all(&joined, " ");
    let collapsed = EXCESS_NEWLINES.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

use anyhow::{Context, Result};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Node};
use serde_json::Value;
use std::path::Path;
use tokio::fs;

use crate::document::Document;

/// Parser used for a family of files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Markdown,
    Html,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy)]
pub struct FilePattern {
    pub glob: &'static str,
    pub extension: &'static str,
    pub kind: LoaderKind,
}

/// Plain text goes through the markdown loader as well.
pub const DEFAULT_PATTERNS: [FilePattern; 5] = [
    FilePattern { glob: "**/*.md", extension: "md", kind: LoaderKind::Markdown },
    FilePattern { glob: "**/*.html", extension: "html", kind: LoaderKind::Html },
    FilePattern { glob: "**/*.json", extension: "json", kind: LoaderKind::Json },
    FilePattern { glob: "**/*.txt", extension: "txt", kind: LoaderKind::Markdown },
    FilePattern { glob: "**/*.csv", extension: "csv", kind: LoaderKind::Csv },
];

impl LoaderKind {
    pub fn for_path(path: &Path) -> Option<Self> {
        let extension = path.extension().and_then(|e| e.to_str())?;
        DEFAULT_PATTERNS
            .iter()
            .find(|p| p.extension == extension)
            .map(|p| p.kind)
    }

    pub fn parse(self, raw: &str, source: &str) -> Result<Vec<Document>> {
        match self {
            LoaderKind::Markdown => Ok(vec![Document::new(markdown_to_text(raw), source)]),
            LoaderKind::Html => Ok(vec![Document::new(html_to_text(raw), source)]),
            LoaderKind::Json => parse_json(raw, source),
            LoaderKind::Csv => parse_csv(raw, source),
        }
    }
}

/// Load one file into documents, picking the loader from its extension
pub async fn load_file(path: &Path) -> Result<Vec<Document>> {
    let kind = LoaderKind::for_path(path).with_context(|| {
        format!("Unsupported file format: {}", path.display())
    })?;
    load_with(kind, path).await
}

pub async fn load_with(kind: LoaderKind, path: &Path) -> Result<Vec<Document>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file: {:?}", path))?;
    let source = path.to_string_lossy();

    kind.parse(&raw, &source)
        .with_context(|| format!("Failed to parse {:?} as {:?}", path, kind))
}

fn markdown_to_text(raw: &str) -> String {
    let mut out = String::new();
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;

    for event in Parser::new_ext(raw, options) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => out.push_str("- "),
            Event::End(TagEnd::Item) | Event::End(TagEnd::TableRow) => out.push('\n'),
            Event::End(TagEnd::TableCell) => out.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::BlockQuote
                | TagEnd::List(_)
                | TagEnd::Table,
            ) => out.push_str("\n\n"),
            _ => {}
        }
    }

    collapse_blank_lines(&out)
}

const SKIPPED_TAGS: [&str; 5] = ["script", "style", "noscript", "head", "template"];

const BLOCK_TAGS: [&str; 21] = [
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "header", "footer", "nav", "blockquote", "main",
];

fn html_to_text(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let mut text = HtmlText::default();
    text.walk(document.root_element());
    text.flush();
    text.blocks.join("\n\n")
}

/// Visible text split at block boundaries
#[derive(Default)]
struct HtmlText {
    blocks: Vec<String>,
    line: String,
}

impl HtmlText {
    fn flush(&mut self) {
        let line = self.line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            self.blocks.push(line);
        }
        self.line.clear();
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if SKIPPED_TAGS.contains(&name) {
            return;
        }

        // Preformatted text keeps its line breaks and indentation
        if name == "pre" {
            self.flush();
            let code: String = element.text().collect();
            let code = code.trim_matches('\n');
            if !code.trim().is_empty() {
                self.blocks.push(code.to_string());
            }
            return;
        }

        let block = BLOCK_TAGS.contains(&name);
        if block {
            self.flush();
        }

        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.line.push_str(text),
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.walk(child_element);
                    }
                }
                _ => {}
            }
        }

        if block {
            self.flush();
        }
    }
}

/// Whole file as one document (identity schema)
fn parse_json(raw: &str, source: &str) -> Result<Vec<Document>> {
    let value: Value = serde_json::from_str(raw).context("Invalid JSON")?;
    let doc = Document::new(value.to_string(), source).with_metadata("seq_num", 1);
    Ok(vec![doc])
}

/// One document per row, rendered as `header: value` lines
fn parse_csv(raw: &str, source: &str) -> Result<Vec<Document>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw.as_bytes());
    let headers = reader.headers().context("Failed to read CSV header")?.clone();

    let mut docs = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV row {}", row))?;
        let content = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        docs.push(Document::new(content, source).with_metadata("row", row));
    }

    Ok(docs)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }

    out.trim().to_string()
}

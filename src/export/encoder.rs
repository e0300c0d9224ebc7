use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::article::Article;

pub const HEADER: [&str; 9] = [
    "feedId", "title", "language", "url", "pub_date", "created", "authors", "summary", "text",
];

pub const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Turns one article into one `;`-delimited, fully quoted line (CRLF-terminated).
#[derive(Debug, Clone, Copy, Default)]
pub struct RowEncoder;

impl RowEncoder {
    pub fn header(&self) -> Result<String> {
        write_line(HEADER.iter().map(|h| h.to_string()).collect())
    }

    pub fn encode(&self, article: &Article) -> Result<String> {
        write_line(self.cells(article))
    }

    /// Column values in header order, before line quoting.
    pub fn cells(&self, article: &Article) -> Vec<String> {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            text(&article.feed_id),
            text(&article.title),
            text(&article.language),
            text(&article.url),
            article.pub_date.as_ref().map(|d| d.to_cell()).unwrap_or_default(),
            article.created.map(|c| c.to_string()).unwrap_or_default(),
            article.authors.join(", "),
            escape_free_text(article.summary.as_deref().unwrap_or_default()),
            escape_free_text(article.text.as_deref().unwrap_or_default()),
        ]
    }
}

/// Drops blank and whitespace-only lines, then wraps in quotes with `"` doubled.
///
/// Lossy on purpose: paragraph breaks inside the field disappear.
pub fn escape_free_text(text: &str) -> String {
    let kept: Vec<&str> = split_lines(text)
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect();
    format!("\"{}\"", kept.join("\n").replace('"', "\"\""))
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Splits on every line boundary, treating `\r\n` as one. No trailing empty piece.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_line_break(c) {
            continue;
        }
        lines.push(&text[start..i]);
        start = i + c.len_utf8();
        if c == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                chars.next();
                start = j + 1;
            }
        }
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

/// Every field quoted, `"` doubled, `\` escaped with a backslash.
fn write_line(cells: Vec<String>) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .quote_style(csv::QuoteStyle::Always)
        .double_quote(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    let escaped: Vec<String> = cells.into_iter().map(|c| c.replace('\\', "\\\\")).collect();
    wtr.write_record(&escaped)?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush csv row: {}", e.error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Append-mode export file. Each batch is synced to disk before `append` returns.
pub struct CsvSink {
    path: PathBuf,
    file: File,
    encoder: RowEncoder,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;

        if file.metadata()?.len() == 0 {
            file.write_all(BOM)?;
            file.sync_data()?;
        }

        Ok(CsvSink {
            path,
            file,
            encoder: RowEncoder,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(&mut self) -> Result<()> {
        let line = self.encoder.header()?;
        self.write_durable(line.as_bytes())
    }

    /// Append all rows of one page; returns how many were written.
    pub fn append(&mut self, articles: &[Article]) -> Result<usize> {
        let mut buf = String::new();
        for article in articles {
            buf.push_str(&self.encoder.encode(article)?);
        }
        self.write_durable(buf.as_bytes())?;
        Ok(articles.len())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .with_context(|| format!("Failed to write {:?}", self.path))?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

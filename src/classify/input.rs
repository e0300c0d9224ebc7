use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::article::{Classification, ClassifiedArticle};
use crate::export::encoder::BOM;

/// One row of the export file, fields as stored on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExportRow {
    #[serde(rename = "feedId")]
    pub feed_id: String,
    pub title: String,
    pub language: String,
    pub url: String,
    pub pub_date: String,
    pub created: String,
    pub authors: String,
    pub summary: String,
    pub text: String,
}

impl ExportRow {
    fn is_repeated_header(&self) -> bool {
        self.feed_id == "feedId" && self.title == "title" && self.text == "text"
    }

    pub fn prompt_title(&self) -> String {
        self.title.trim_matches('"').to_string()
    }

    /// The summary, or the full text when the summary is empty.
    pub fn prompt_text(&self) -> String {
        let summary = unwrap_quoted(&self.summary);
        if summary.is_empty() {
            unwrap_quoted(&self.text)
        } else {
            summary
        }
    }

    pub fn into_classified(
        self,
        classification: Option<Classification>,
        error: Option<String>,
    ) -> ClassifiedArticle {
        ClassifiedArticle {
            title: self.prompt_title(),
            summary: unwrap_quoted(&self.summary),
            text: unwrap_quoted(&self.text),
            feed_id: self.feed_id,
            language: self.language,
            url: self.url,
            pub_date: self.pub_date,
            created: self.created,
            authors: self.authors,
            classification,
            error,
        }
    }
}

/// Reverses the free-text quoting: outer quotes removed, `""` back to `"`.
pub fn unwrap_quoted(field: &str) -> String {
    match field
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => field.to_string(),
    }
}

/// Reads up to `limit` data rows. Header rows repeated by restarted exports are skipped.
pub fn read_export(path: impl AsRef<Path>, limit: Option<usize>) -> Result<Vec<ExportRow>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    if reader.fill_buf()?.starts_with(BOM) {
        reader.consume(BOM.len());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .escape(Some(b'\\'))
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (i, record) in rdr.deserialize::<ExportRow>().enumerate() {
        if limit.is_some_and(|n| rows.len() >= n) {
            break;
        }
        let row = record.with_context(|| format!("Bad row {} in {:?}", i + 2, path))?;
        if row.is_repeated_header() {
            debug!("Skipping repeated header at row {}", i + 2);
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{Article, PubDate};
    use crate::export::encoder::CsvSink;

    fn article(id: &str, summary: &str, text: &str) -> Article {
        Article {
            feed_id: Some(id.into()),
            title: Some(format!("Title \"{}\"", id)),
            language: Some("nl".into()),
            url: Some(format!("https://example.org/{}", id)),
            pub_date: Some(PubDate::from("2024-03-14T03:00:00Z".to_string())),
            created: Some(1710385200),
            authors: vec!["Ann".into()],
            summary: Some(summary.into()),
            text: Some(text.into()),
        }
    }

    #[test]
    fn unwrap_reverses_free_text_quoting() {
        assert_eq!(unwrap_quoted("\"say \"\"hi\"\"\""), "say \"hi\"");
        assert_eq!(unwrap_quoted("\"\""), "");
        assert_eq!(unwrap_quoted("plain"), "plain");
        assert_eq!(unwrap_quoted("\""), "\"");
    }

    #[test]
    fn reads_what_the_exporter_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.write_header().unwrap();
        sink.append(&[
            article("1", "", "Line one\n\nLine \"two\" with C:\\dir;x"),
            article("2", "Short", "Long"),
        ])
        .unwrap();
        // a second run appends another header
        sink.write_header().unwrap();
        sink.append(&[article("3", "", "")]).unwrap();
        drop(sink);

        let rows = read_export(&path, None).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].feed_id, "1");
        assert_eq!(rows[0].prompt_title(), "Title \"1");
        assert_eq!(rows[0].created, "1710385200");
        assert_eq!(rows[0].pub_date, "2024-03-14T03:00:00+00:00");
        assert_eq!(rows[0].prompt_text(), "Line one\nLine \"two\" with C:\\dir;x");

        assert_eq!(rows[1].prompt_text(), "Short");
        assert_eq!(rows[2].feed_id, "3");
        assert_eq!(rows[2].prompt_text(), "");
    }

    #[test]
    fn limit_caps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();
        sink.write_header().unwrap();
        let batch: Vec<_> = (0..5).map(|i| article(&i.to_string(), "s", "t")).collect();
        sink.append(&batch).unwrap();
        drop(sink);

        let rows = read_export(&path, Some(2)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].feed_id, "1");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_export("/nonexistent/export.csv", None).is_err());
    }
}

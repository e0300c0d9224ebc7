pub mod encoder;
pub mod weaviate;
pub mod window;

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::info;

use crate::db::{self, Checkpoint};
use encoder::CsvSink;
use weaviate::PageFetcher;
use window::{TimeWindow, WindowIterator};

/// Progress of one export run. Lives only as long as the run, unless checkpointed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportState {
    pub current_window: TimeWindow,
    pub records_written: usize,
    pub ceiling: usize,
}

struct CheckpointTarget {
    conn: Connection,
    key: String,
}

/// Walks the windows in order, fetching one page per window and appending it to the sink.
pub struct StreamingExporter<F> {
    fetcher: F,
    windows: WindowIterator,
    state: ExportState,
    write_header: bool,
    checkpoint: Option<CheckpointTarget>,
}

impl<F: PageFetcher> StreamingExporter<F> {
    pub fn new(fetcher: F, windows: WindowIterator) -> Self {
        let end = windows.end();
        StreamingExporter {
            fetcher,
            windows,
            state: ExportState {
                current_window: TimeWindow::new(end, end),
                records_written: 0,
                ceiling: 0,
            },
            write_header: true,
            checkpoint: None,
        }
    }

    /// Persist progress after every window under `key` (normally the output path).
    pub fn with_checkpoint(mut self, conn: Connection, key: impl Into<String>) -> Result<Self> {
        db::init_schema(&conn)?;
        self.checkpoint = Some(CheckpointTarget {
            conn,
            key: key.into(),
        });
        Ok(self)
    }

    /// Continue a previous run: keep its count and skip the header. The window
    /// iterator must already start at `checkpoint.window_end`.
    pub fn resume_from(mut self, checkpoint: &Checkpoint) -> Self {
        self.state.records_written = checkpoint.records_written;
        self.write_header = false;
        self
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    /// Runs until the windows are exhausted or `max_records` is reached.
    ///
    /// The ceiling is only checked before each fetch, so the last page may
    /// overshoot it. Fetch errors abort the run.
    pub async fn run(&mut self, sink: &mut CsvSink, max_records: usize) -> Result<usize> {
        self.state.ceiling = max_records;
        if self.write_header {
            sink.write_header()?;
            self.write_header = false;
        }

        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(200));

        while self.state.records_written < self.state.ceiling {
            let Some(window) = self.windows.next() else {
                break;
            };
            self.state.current_window = window;
            if window.is_exhausted() {
                info!("Done processing articles");
                break;
            }

            info!("Processing articles from {} till {}", window.start, window.end);
            pb.set_message(format!("{} ({} written)", window, self.state.records_written));

            let page = self
                .fetcher
                .fetch(&window)
                .await
                .with_context(|| format!("Fetching window {} failed", window))?;

            if page.is_empty() {
                info!("No articles to fetch");
                self.save_checkpoint(&window)?;
                continue;
            }

            self.state.records_written += sink.append(&page)?;
            self.save_checkpoint(&window)?;
            info!("Total articles processed: {}", self.state.records_written);
        }

        pb.finish_and_clear();
        info!(
            "Stopped at window {} with {} articles in {:?}",
            self.state.current_window,
            self.state.records_written,
            sink.path()
        );
        Ok(self.state.records_written)
    }

    fn save_checkpoint(&self, window: &TimeWindow) -> Result<()> {
        if let Some(target) = &self.checkpoint {
            db::save_checkpoint(&target.conn, &target.key, window.end, self.state.records_written)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;
    use crate::classify::input::read_export;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::path::Path;

    /// In-memory record store applying the same half-open filter as the database.
    struct MemoryStore {
        articles: Vec<Article>,
        calls: RefCell<Vec<TimeWindow>>,
        fail_on_call: Option<usize>,
    }

    impl MemoryStore {
        fn new(articles: Vec<Article>) -> Self {
            MemoryStore {
                articles,
                calls: RefCell::new(Vec::new()),
                fail_on_call: None,
            }
        }
    }

    impl PageFetcher for &MemoryStore {
        async fn fetch(&self, window: &TimeWindow) -> Result<Vec<Article>> {
            let call = self.calls.borrow().len();
            self.calls.borrow_mut().push(*window);
            if self.fail_on_call == Some(call) {
                anyhow::bail!("connection refused");
            }
            Ok(self
                .articles
                .iter()
                .filter(|a| a.created.is_some_and(|c| window.contains_epoch(c)))
                .cloned()
                .collect())
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap()
            + chrono::Duration::hours(h as i64)
            + chrono::Duration::minutes(m as i64)
    }

    fn article(id: &str, created: DateTime<Utc>) -> Article {
        Article {
            feed_id: Some(id.to_string()),
            title: Some(format!("title {}", id)),
            created: Some(created.timestamp()),
            text: Some(format!("body of {}", id)),
            ..Default::default()
        }
    }

    fn windows(start: DateTime<Utc>, end: DateTime<Utc>) -> WindowIterator {
        WindowIterator::new(start, end, chrono::Duration::hours(6)).unwrap()
    }

    fn written_ids(path: &Path) -> Vec<String> {
        read_export(path, None)
            .unwrap()
            .into_iter()
            .map(|r| r.feed_id)
            .collect()
    }

    #[tokio::test]
    async fn first_two_windows_split_at_boundary() {
        let store = MemoryStore::new(vec![article("a", at(3, 0)), article("b", at(6, 0))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(12, 0)));
        let written = exporter.run(&mut sink, 1_000_000).await.unwrap();

        assert_eq!(written, 2);
        let calls = store.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], TimeWindow::new(at(0, 0), at(6, 0)));
        assert_eq!(calls[1], TimeWindow::new(at(6, 0), at(12, 0)));
        assert_eq!(written_ids(&path), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn every_record_in_range_written_once() {
        let mut articles = Vec::new();
        for h in 0..30u32 {
            articles.push(article(&format!("on-{}", h), at(h, 0)));
            articles.push(article(&format!("mid-{}", h), at(h, 59)));
        }
        // outside [start, end)
        articles.push(article("before", at(0, 0) - chrono::Duration::seconds(1)));
        articles.push(article("at-end", at(27, 0)));

        let store = MemoryStore::new(articles);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(27, 0)));
        let written = exporter.run(&mut sink, usize::MAX).await.unwrap();

        let ids = written_ids(&path);
        let unique: HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(ids.len(), unique.len());
        assert_eq!(written, 54);
        assert_eq!(ids.len(), 54);
        assert!(!unique.contains("before"));
        assert!(!unique.contains("at-end"));
        assert!(unique.contains("on-0"));
        assert!(unique.contains("mid-26"));
        // five windows, the last clamped to 27:00
        assert_eq!(store.calls.borrow().len(), 5);
        assert_eq!(store.calls.borrow()[4], TimeWindow::new(at(24, 0), at(27, 0)));
    }

    #[tokio::test]
    async fn equal_bounds_fetch_nothing() {
        let store = MemoryStore::new(vec![article("a", at(0, 0))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(0, 0)));
        assert_eq!(exporter.run(&mut sink, 10).await.unwrap(), 0);
        assert!(store.calls.borrow().is_empty());
        assert!(exporter.state().current_window.is_exhausted());
        // header only
        assert!(written_ids(&path).is_empty());
    }

    #[tokio::test]
    async fn ceiling_checked_before_fetch_only() {
        let articles = (0..5).map(|i| article(&i.to_string(), at(1, i))).collect();
        let store = MemoryStore::new(articles);
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path().join("export.csv")).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(24, 0)));
        let written = exporter.run(&mut sink, 2).await.unwrap();

        // the single page overshoots the ceiling and the loop stops afterwards
        assert_eq!(written, 5);
        assert_eq!(store.calls.borrow().len(), 1);
        assert_eq!(exporter.state().ceiling, 2);
    }

    #[tokio::test]
    async fn empty_windows_are_skipped() {
        let store = MemoryStore::new(vec![article("late", at(20, 0))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = CsvSink::open(&path).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(24, 0)));
        assert_eq!(exporter.run(&mut sink, 100).await.unwrap(), 1);
        assert_eq!(store.calls.borrow().len(), 4);
        assert_eq!(written_ids(&path), vec!["late"]);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_after_durable_windows() {
        let mut store = MemoryStore::new(vec![article("a", at(1, 0)), article("b", at(7, 0))]);
        store.fail_on_call = Some(1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let conn = db::connect(dir.path().join("state.sqlite")).unwrap();
        let mut sink = CsvSink::open(&path).unwrap();

        let mut exporter = StreamingExporter::new(&store, windows(at(0, 0), at(12, 0)))
            .with_checkpoint(conn, "export.csv")
            .unwrap();
        let err = exporter.run(&mut sink, 100).await.unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));

        assert_eq!(written_ids(&path), vec!["a"]);
        let conn = db::connect(dir.path().join("state.sqlite")).unwrap();
        let cp = db::load_checkpoint(&conn, "export.csv").unwrap().unwrap();
        assert_eq!(cp.window_end, at(6, 0));
        assert_eq!(cp.records_written, 1);
    }

    #[tokio::test]
    async fn resume_continues_from_checkpoint() {
        let store = MemoryStore::new(vec![article("a", at(1, 0)), article("b", at(7, 0))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");

        let checkpoint = Checkpoint {
            output_path: "export.csv".into(),
            window_end: at(6, 0),
            records_written: 1,
            updated_at: String::new(),
        };
        {
            // what the interrupted run left behind
            let mut sink = CsvSink::open(&path).unwrap();
            sink.write_header().unwrap();
            sink.append(&[article("a", at(1, 0))]).unwrap();
        }

        let mut sink = CsvSink::open(&path).unwrap();
        let mut exporter = StreamingExporter::new(&store, windows(checkpoint.window_end, at(12, 0)))
            .resume_from(&checkpoint);
        assert_eq!(exporter.run(&mut sink, 100).await.unwrap(), 2);

        assert_eq!(store.calls.borrow().len(), 1);
        assert_eq!(written_ids(&path), vec!["a", "b"]);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.matches("\"feedId\"").count(), 1);
    }
}

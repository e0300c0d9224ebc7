pub mod backend;
pub mod input;
pub mod output;
pub mod prompt;

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::article::{Classification, ClassifiedArticle};
use backend::CompletionBackend;
use input::ExportRow;

const BASE_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not read classification ({reason}) from: {raw}")]
    Malformed { reason: String, raw: String },
    #[error("event_chance {0} is outside 1..=4")]
    OutOfRange(i64),
    #[error("gave up after {attempts} attempts, last error: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ClassifyError>,
    },
}

impl ClassifyError {
    /// Rate limits, server errors and transport failures get a pause before the next attempt.
    fn wants_backoff(&self) -> bool {
        match self {
            ClassifyError::Transport(_) => true,
            ClassifyError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Pulls the outermost `{...}` out of a model reply (code fences, chatter around it).
fn json_object(raw: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));
    re.find(raw).map(|m| m.as_str())
}

pub fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    let body = json_object(raw).ok_or_else(|| ClassifyError::Malformed {
        reason: "no JSON object".into(),
        raw: raw.to_string(),
    })?;
    let parsed: Classification =
        serde_json::from_str(body).map_err(|e| ClassifyError::Malformed {
            reason: e.to_string(),
            raw: raw.to_string(),
        })?;
    if !(1..=4).contains(&parsed.event_chance) {
        return Err(ClassifyError::OutOfRange(parsed.event_chance));
    }
    Ok(parsed)
}

pub struct Classifier<B> {
    backend: B,
    max_attempts: u32,
}

impl<B: CompletionBackend> Classifier<B> {
    pub fn new(backend: B, max_attempts: u32) -> Self {
        Classifier {
            backend,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// At most `max_attempts` calls; the last error is returned inside `Exhausted`.
    pub async fn classify(&self, title: &str, text: &str) -> Result<Classification, ClassifyError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.backend.complete(title, text).await {
                Ok(raw) => parse_classification(&raw),
                Err(e) => Err(e),
            };
            let err = match result {
                Ok(c) => return Ok(c),
                Err(e) => e,
            };

            if attempt >= self.max_attempts {
                return Err(ClassifyError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            warn!(
                "Classification attempt {}/{} failed: {}",
                attempt, self.max_attempts, err
            );
            if err.wants_backoff() {
                tokio::time::sleep(backoff_for(attempt)).await;
            }
        }
    }
}

/// 1s, 2s, 4s, ... capped at `MAX_BACKOFF_MS`.
fn backoff_for(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(1u64 << exp).min(MAX_BACKOFF_MS))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyStats {
    pub total: usize,
    pub classified: usize,
    pub failed: usize,
}

/// Classifies each row in order. Failures are kept in the output with `error` set.
pub async fn process_rows<B: CompletionBackend>(
    classifier: &Classifier<B>,
    rows: Vec<ExportRow>,
) -> Result<(Vec<ClassifiedArticle>, ClassifyStats)> {
    let pb = ProgressBar::new(rows.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let start = Instant::now();
    let mut stats = ClassifyStats {
        total: rows.len(),
        ..Default::default()
    };
    let mut results = Vec::with_capacity(rows.len());

    for row in rows {
        let title = row.prompt_title();
        let text = row.prompt_text();

        let (classification, error) = match classifier.classify(&title, &text).await {
            Ok(c) => {
                stats.classified += 1;
                (Some(c), None)
            }
            Err(e) => {
                stats.failed += 1;
                warn!("Giving up on article {}: {}", row.feed_id, e);
                (None, Some(e.to_string()))
            }
        };
        results.push(row.into_classified(classification, error));

        let done = results.len();
        debug!(
            "Processed item {} in {:.2}s avg",
            done,
            start.elapsed().as_secs_f64() / done as f64
        );
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Classified {} of {} articles ({} failed) with {}",
        stats.classified,
        stats.total,
        stats.failed,
        classifier.model()
    );
    Ok((results, stats))
}

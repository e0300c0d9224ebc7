use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::article::{ClassifiedArticle, CLASSIFIED_HEADER};
use crate::export::encoder::BOM;

fn create(path: &Path) -> Result<BufWriter<File>> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(BufWriter::new(file))
}

pub fn save_as_json(data: &[ClassifiedArticle], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut out = create(path)?;
    serde_json::to_writer_pretty(&mut out, data)
        .with_context(|| format!("Failed to write {:?}", path))?;
    out.flush()?;
    Ok(())
}

/// `;`-delimited, minimal quoting, BOM-prefixed.
pub fn save_as_csv(data: &[ClassifiedArticle], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut out = create(path)?;
    out.write_all(BOM)?;

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .terminator(csv::Terminator::CRLF)
        .from_writer(out);
    wtr.write_record(CLASSIFIED_HEADER)?;
    for item in data {
        wtr.write_record(item.csv_cells())?;
    }
    wtr.flush()?;
    wtr.into_inner()
        .map_err(|e| anyhow!("Failed to flush {:?}: {}", path, e.error()))?
        .flush()?;
    Ok(())
}

//! JSON report output

use crate::crawler::CrawlReport;
use crate::output::OutputResult;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Serializes any report value as pretty JSON
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> OutputResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Writes the full crawl report, pages included, to `output_path`
pub fn write_json_report(report: &CrawlReport, output_path: &Path) -> OutputResult<()> {
    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    tracing::info!(
        "Wrote report with {} pages to {}",
        report.pages.len(),
        output_path.display()
    );
    Ok(())
}

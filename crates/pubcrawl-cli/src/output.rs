//! Report output: JSON or CSV, to a file or stdout.

use anyhow::{Context, Result};
use clap::ValueEnum;
use pubcrawl::{CaptureReport, ErrorSummary};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

/// Write `report` in `format`.
///
/// CSV has one row per response: the URL and the JSON encoding of its content.
pub fn write_report<W: Write>(report: &CaptureReport, format: OutputFormat, out: W) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let mut out = out;
            serde_json::to_writer_pretty(&mut out, report).context("failed to serialize report")?;
            writeln!(out)?;
            out.flush()?;
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            writer.write_record(["url", "content"])?;
            for response in &report.responses {
                let content = serde_json::to_string(&response.content)?;
                writer.write_record([response.matched_url.as_str(), content.as_str()])?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Write to `path`, or to stdout when no path is given.
pub fn emit(report: &CaptureReport, format: OutputFormat, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create output file: {}", path.display()))?;
            write_report(report, format, BufWriter::new(file))
        }
        None => write_report(report, format, std::io::stdout().lock()),
    }
}

/// Human-readable error summary for stderr.
pub fn error_summary(summary: &ErrorSummary) -> String {
    format!(
        "\nError Summary:\n\
         Cloudflare protection encounters: {}\n\
         Missing content errors: {}\n\
         Other errors: {}",
        summary.cloudflare_protection, summary.missing_content, summary.other_errors
    )
}

//! Aggregating per-site results into a report, and rendering reports.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::check::{CheckResult, Classification, Failure};

/// All results for one username, one per site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    /// The username that was checked.
    pub username: String,
    /// Results in registry order, unless re-sorted.
    pub results: Vec<CheckResult>,
}

/// How many sites fell into each classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Sites where the username exists.
    pub taken: usize,
    /// Sites where it does not.
    pub available: usize,
    /// Sites that could not be classified.
    pub unknown: usize,
}

impl Report {
    /// Collect results in the order given.
    pub fn aggregate(
        username: impl Into<String>,
        results: impl IntoIterator<Item = CheckResult>,
    ) -> Self {
        Self {
            username: username.into(),
            results: results.into_iter().collect(),
        }
    }

    /// Sort results by site name, case-insensitively.
    pub fn sort_by_site(&mut self) {
        self.results
            .sort_by_cached_key(|result| result.site.to_lowercase());
    }

    /// The result for `site`, if it was checked.
    #[must_use]
    pub fn get(&self, site: &str) -> Option<&CheckResult> {
        self.results.iter().find(|result| result.site == site)
    }

    /// Results where the username is taken.
    pub fn taken(&self) -> impl Iterator<Item = &CheckResult> {
        self.results
            .iter()
            .filter(|result| result.classification == Classification::Taken)
    }

    /// Tally of classifications.
    #[must_use]
    pub fn counts(&self) -> Counts {
        self.results
            .iter()
            .fold(Counts::default(), |mut counts, result| {
                match result.classification {
                    Classification::Taken => counts.taken += 1,
                    Classification::Available => counts.available += 1,
                    Classification::Unknown => counts.unknown += 1,
                }
                counts
            })
    }
}

/// Output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines, `[+] Site: url`.
    #[default]
    Text,
    /// `site<TAB>label[: detail]<TAB>url`, one line per site.
    Tsv,
    /// A JSON array of reports.
    Json,
    /// One CSV row per site, with a header.
    Csv,
}

impl Format {
    /// Whether results can be written one line at a time as they arrive.
    #[must_use]
    pub fn is_line_oriented(self) -> bool {
        matches!(self, Self::Text | Self::Tsv)
    }

    /// File extension used by [`write_report_files`].
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Rendering settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Output format.
    pub format: Format,
    /// Include available and unknown sites in text and TSV output.
    /// JSON and CSV always include every site.
    pub print_all: bool,
    /// Append response times to text output.
    pub show_elapsed: bool,
}

/// Errors writing a rendered report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RenderError {
    /// Writing to the output failed.
    #[error("writing report: {0}")]
    Io(#[from] io::Error),
    /// JSON encoding failed.
    #[error("encoding JSON report: {0}")]
    Json(#[from] serde_json::Error),
    /// CSV encoding failed.
    #[error("encoding CSV report: {0}")]
    Csv(#[from] csv::Error),
    /// A report file could not be created.
    #[error("creating {}: {source}", .path.display())]
    File {
        /// The file or directory being created.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

/// Render `reports` to `out`.
///
/// # Errors
///
/// Returns a [`RenderError`] if writing or encoding fails.
pub fn write_reports<W: Write>(
    mut out: W,
    reports: &[Report],
    options: RenderOptions,
) -> Result<(), RenderError> {
    match options.format {
        Format::Text | Format::Tsv => {
            for report in reports {
                write_header(&mut out, &report.username, options)?;
                for result in &report.results {
                    write_result(&mut out, result, options)?;
                }
                write_footer(&mut out, report, options)?;
            }
        }
        Format::Json => {
            serde_json::to_writer_pretty(&mut out, reports)?;
            writeln!(out)?;
        }
        Format::Csv => write_csv(&mut out, reports)?,
    }
    out.flush()?;
    Ok(())
}

/// Start the text rendering of one username. Writes nothing for other
/// formats.
///
/// # Errors
///
/// Returns the writer's error.
pub fn write_header<W: Write>(out: &mut W, username: &str, options: RenderOptions) -> io::Result<()> {
    match options.format {
        Format::Text => writeln!(out, "[*] Checking username {username} on:"),
        _ => Ok(()),
    }
}

/// Write the line for one result in text or TSV, if it is visible under
/// `options.print_all`. Writes nothing for other formats.
///
/// # Errors
///
/// Returns the writer's error.
pub fn write_result<W: Write>(
    out: &mut W,
    result: &CheckResult,
    options: RenderOptions,
) -> io::Result<()> {
    if !options.print_all && result.classification != Classification::Taken {
        return Ok(());
    }
    match options.format {
        Format::Text => write_text_line(out, result, options.show_elapsed),
        Format::Tsv => {
            let detail = match &result.failure {
                Some(failure) => format!(": {failure}"),
                None => String::new(),
            };
            writeln!(
                out,
                "{}\t{}{detail}\t{}",
                result.site, result.classification, result.url
            )
        }
        Format::Json | Format::Csv => Ok(()),
    }
}

/// Finish the text rendering of one username. Writes nothing for other
/// formats.
///
/// # Errors
///
/// Returns the writer's error.
pub fn write_footer<W: Write>(out: &mut W, report: &Report, options: RenderOptions) -> io::Result<()> {
    match options.format {
        Format::Text => writeln!(
            out,
            "[*] Search completed with {} results",
            report.counts().taken
        ),
        _ => Ok(()),
    }
}

fn write_text_line<W: Write>(out: &mut W, result: &CheckResult, show_elapsed: bool) -> io::Result<()> {
    let elapsed = match result.elapsed_ms {
        Some(ms) if show_elapsed => format!(" [{ms} ms]"),
        _ => String::new(),
    };
    match (&result.classification, &result.failure) {
        (Classification::Taken, _) => writeln!(out, "[+]{elapsed} {}: {}", result.site, result.url),
        (Classification::Available, _) => writeln!(out, "[-]{elapsed} {}: Not Found!", result.site),
        (Classification::Unknown, Some(failure)) => {
            writeln!(out, "[?]{elapsed} {}: {failure}", result.site)
        }
        (Classification::Unknown, None) => writeln!(out, "[?]{elapsed} {}: unknown", result.site),
    }
}

// Status words of the CSV `exists` column.
fn query_status(result: &CheckResult) -> &'static str {
    match (result.classification, &result.failure) {
        (Classification::Taken, _) => "Claimed",
        (Classification::Available, _) => "Available",
        (Classification::Unknown, Some(Failure::IllegalUsername)) => "Illegal",
        (Classification::Unknown, _) => "Unknown",
    }
}

fn write_csv<W: Write>(out: W, reports: &[Report]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record([
        "username",
        "name",
        "url_main",
        "url_user",
        "exists",
        "http_status",
        "response_time_s",
    ])?;

    for report in reports {
        for result in &report.results {
            let http_status = result
                .http_status
                .map(|status| status.to_string())
                .unwrap_or_default();
            let response_time = result
                .elapsed_ms
                .map(|ms| format!("{:.3}", ms as f64 / 1000.0))
                .unwrap_or_default();
            writer.write_record([
                report.username.as_str(),
                result.site.as_str(),
                result.url_main.as_str(),
                result.url.as_str(),
                query_status(result),
                http_status.as_str(),
                response_time.as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the profile URLs where the username was found, one per line,
/// followed by a total.
///
/// # Errors
///
/// Returns the writer's error.
pub fn write_claimed_summary<W: Write>(mut out: W, report: &Report) -> io::Result<()> {
    let mut claimed = 0;
    for result in report.taken() {
        writeln!(out, "{}", result.url)?;
        claimed += 1;
    }
    writeln!(out, "Total Websites Username Detected On : {claimed}")?;
    out.flush()
}

/// Write one CSV of every username's claimed profiles, with the number of
/// sites each username was found on.
///
/// # Errors
///
/// Returns a [`csv::Error`] if writing fails.
pub fn write_master_csv<W: Write>(out: W, reports: &[Report]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["username", "name", "url_user", "account_count"])?;
    for report in reports {
        let account_count = report.counts().taken.to_string();
        for result in report.taken() {
            writer.write_record([
                report.username.as_str(),
                result.site.as_str(),
                result.url.as_str(),
                account_count.as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write one file per report into `dir`, creating it if needed. Files are
/// named after the username with the format's extension. In the text
/// format each file holds the claimed summary of
/// [`write_claimed_summary`].
///
/// Returns the paths written, in report order.
///
/// # Errors
///
/// Returns a [`RenderError`] if the directory or a file cannot be created
/// or written.
pub fn write_report_files(
    dir: &Path,
    reports: &[Report],
    options: RenderOptions,
) -> Result<Vec<PathBuf>, RenderError> {
    fs::create_dir_all(dir).map_err(|source| RenderError::File {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(reports.len());
    for report in reports {
        let path = dir.join(format!("{}.{}", report.username, options.format.extension()));
        let file = File::create(&path).map_err(|source| RenderError::File {
            path: path.clone(),
            source,
        })?;
        let out = BufWriter::new(file);
        match options.format {
            Format::Text => write_claimed_summary(out, report)?,
            _ => write_reports(out, std::slice::from_ref(report), options)?,
        }
        debug!(path = %path.display(), "report written");
        written.push(path);
    }
    Ok(written)
}

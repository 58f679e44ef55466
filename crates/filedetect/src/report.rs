//! Result lines and the end-of-run summary.

use anyhow::{Context, Result};
use filedetect_protocol::{DetectResult, Sequence, Verdict};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub fail_count: usize,
    pub white_count: usize,
    pub black_count: usize,
}

impl Summary {
    pub fn record(&mut self, result: &DetectResult) {
        match result.verdict() {
            Some(Verdict::Black) => self.black_count += 1,
            Some(Verdict::White) | Some(Verdict::Unknown) => self.white_count += 1,
            None => self.fail_count += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fail_count + self.white_count + self.black_count
    }

    pub fn render(&self, format: OutputFormat, elapsed: Duration) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(format!(
                "[SCAN] [ END ] files: {}, fail_count: {}, white_count: {}, black_count: {}, time: {}ms",
                self.total(),
                self.fail_count,
                self.white_count,
                self.black_count,
                elapsed.as_millis()
            )),
            OutputFormat::Json => {
                #[derive(Serialize)]
                struct SummaryLine<'a> {
                    summary: &'a Summary,
                    elapsed_ms: u128,
                }
                serde_json::to_string(&SummaryLine {
                    summary: self,
                    elapsed_ms: elapsed.as_millis(),
                })
                .context("Failed to serialize summary")
            }
        }
    }
}

#[derive(Serialize)]
struct ResultLine<'a> {
    sequence: Sequence,
    path: String,
    result: &'a DetectResult,
}

/// One output line for a delivered result.
pub fn render_result(
    format: OutputFormat,
    sequence: Sequence,
    path: &Path,
    result: &DetectResult,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format!("{} path: {}", result, path.display())),
        OutputFormat::Json => serde_json::to_string(&ResultLine {
            sequence,
            path: path.display().to_string(),
            result,
        })
        .context("Failed to serialize result"),
    }
}

/// Writes result lines as they arrive and keeps the running [`Summary`].
pub struct Reporter<W> {
    format: OutputFormat,
    out: W,
    summary: Summary,
}

impl<W: Write> Reporter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self {
            format,
            out,
            summary: Summary::default(),
        }
    }

    /// Header line. Text output only.
    pub fn start(&mut self, root: &Path, timeout_ms: i64, sync: bool) -> Result<()> {
        if self.format == OutputFormat::Text {
            writeln!(
                self.out,
                "[SCAN] [START] path: {}, detect_timeout_ms: {}, is_sync: {}",
                root.display(),
                timeout_ms,
                sync
            )?;
        }
        Ok(())
    }

    pub fn record(&mut self, sequence: Sequence, path: &Path, result: &DetectResult) -> Result<()> {
        self.summary.record(result);
        let line = render_result(self.format, sequence, path, result)?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn finish(mut self, elapsed: Duration) -> Result<Summary> {
        let line = self.summary.render(self.format, elapsed)?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(self.summary)
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedetect_protocol::{DetectSuccess, ErrorKind};

    fn black() -> DetectResult {
        DetectResult::Success(DetectSuccess {
            fingerprint: "781e5e245d69b566979b86e28d23f2c7".to_string(),
            elapsed: Duration::from_millis(1200),
            verdict: Verdict::Black,
            score: 80,
            virus_type: Some("Trojan".to_string()),
            ext_info: None,
        })
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::default();
        summary.record(&black());
        summary.record(&DetectResult::failure(
            ErrorKind::Timeout,
            None,
            Duration::ZERO,
        ));
        assert_eq!(
            summary,
            Summary {
                fail_count: 1,
                white_count: 0,
                black_count: 1
            }
        );
        assert_eq!(summary.total(), 2);

        let line = summary
            .render(OutputFormat::Text, Duration::from_millis(1500))
            .unwrap();
        assert!(line.contains("fail_count: 1"));
        assert!(line.contains("time: 1500ms"));
    }

    #[test]
    fn test_json_result_line() {
        let line = render_result(
            OutputFormat::Json,
            Sequence::new(3),
            Path::new("/tmp/a.bin"),
            &black(),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["sequence"], 3);
        assert_eq!(value["path"], "/tmp/a.bin");
        assert_eq!(value["result"]["status"], "success");
        assert_eq!(value["result"]["verdict"], "BLACK");
    }

    #[test]
    fn test_text_result_line() {
        let line = render_result(
            OutputFormat::Text,
            Sequence::new(3),
            Path::new("a.bin"),
            &black(),
        )
        .unwrap();
        assert!(line.starts_with("[DETECT RESULT] [SUCCEED]"));
        assert!(line.ends_with("path: a.bin"));
    }

    #[test]
    fn test_reporter_writes_lines_and_summary() {
        let mut reporter = Reporter::new(OutputFormat::Text, Vec::new());
        reporter.start(Path::new("/data"), 120_000, false).unwrap();
        reporter
            .record(Sequence::new(1), Path::new("/data/a.bin"), &black())
            .unwrap();
        assert_eq!(reporter.summary().black_count, 1);

        let mut out = Vec::new();
        let summary = {
            let mut sink = Reporter::new(OutputFormat::Text, &mut out);
            sink.record(Sequence::new(1), Path::new("a"), &black()).unwrap();
            sink.finish(Duration::from_millis(10)).unwrap()
        };
        assert_eq!(summary.total(), 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.starts_with(
            "[SCAN] [START] path: /data, detect_timeout_ms: 120000, is_sync: false"
        ));
    }

    #[test]
    fn test_json_mode_skips_header() {
        let mut reporter = Reporter::new(OutputFormat::Json, Vec::new());
        reporter.start(Path::new("/data"), -1, true).unwrap();
        assert!(reporter.into_inner().is_empty());
    }
}

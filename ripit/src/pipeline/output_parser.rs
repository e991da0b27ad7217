//! Incremental parsing of tool output.
//!
//! Raw chunks are split into records on `\n` or `\r` (tools rewrite progress lines with a
//! bare carriage return). The trailing partial record stays buffered until the next chunk.
//! Each complete record goes through a [`LineParser`], which either yields a progress record,
//! asks for the line to be kept as a log line, or swallows it.

use std::sync::LazyLock;

use process_utils::{OutputSink, StreamKind};
use regex::Regex;
use serde::Serialize;

/// What a line parser made of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome<T> {
    Progress(T),
    /// Not progress. Kept verbatim in the log buffer.
    Log,
    /// Consumed without output, e.g. a key accumulated for a later record.
    Skip,
}

pub trait LineParser: Send {
    type Record: Serialize + Send;

    fn parse_line(&mut self, line: &str) -> LineOutcome<Self::Record>;
}

/// Keeps every line as a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyParser;

impl LineParser for LogOnlyParser {
    type Record = ();

    fn parse_line(&mut self, _line: &str) -> LineOutcome<()> {
        LineOutcome::Log
    }
}

/// Line-buffering state for one output stream.
pub struct OutputStreamParser<P: LineParser> {
    parser: P,
    buffer: Vec<u8>,
    logs: Vec<String>,
}

impl<P: LineParser> OutputStreamParser<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            buffer: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Feed a raw chunk, returning the progress records completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<P::Record> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|&b| matches!(b, b'\n' | b'\r')) {
            let line: Vec<u8> = self.buffer.drain(..=idx).collect();
            self.handle_line(&line[..idx], &mut records);
        }
        records
    }

    /// Flush the buffered partial line after the stream ended.
    pub fn finish(&mut self) -> Vec<P::Record> {
        let line = std::mem::take(&mut self.buffer);
        let mut records = Vec::new();
        self.handle_line(&line, &mut records);
        records
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    /// Last `n` log lines joined for an error message.
    pub fn log_tail(&self, n: usize) -> String {
        let start = self.logs.len().saturating_sub(n);
        self.logs[start..].join("\n")
    }

    fn handle_line(&mut self, raw: &[u8], records: &mut Vec<P::Record>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        match self.parser.parse_line(line) {
            LineOutcome::Progress(record) => records.push(record),
            LineOutcome::Log => self.logs.push(line.to_string()),
            LineOutcome::Skip => {}
        }
    }
}

/// Process sink that parses stdout for progress and keeps stderr as log lines.
pub struct ParsingSink<P: LineParser, F> {
    stdout: OutputStreamParser<P>,
    stderr: OutputStreamParser<LogOnlyParser>,
    on_progress: F,
}

impl<P, F> ParsingSink<P, F>
where
    P: LineParser,
    F: FnMut(P::Record) + Send,
{
    pub fn new(parser: P, on_progress: F) -> Self {
        Self {
            stdout: OutputStreamParser::new(parser),
            stderr: OutputStreamParser::new(LogOnlyParser),
            on_progress,
        }
    }

    /// Flush partial lines once the process has exited.
    pub fn finish(&mut self) {
        for record in self.stdout.finish() {
            (self.on_progress)(record);
        }
        self.stderr.finish();
    }

    /// Last `n` lines of each stream, stderr first.
    pub fn log_tail(&self, n: usize) -> String {
        [self.stderr.log_tail(n), self.stdout.log_tail(n)]
            .into_iter()
            .filter(|tail| !tail.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<P, F> OutputSink for ParsingSink<P, F>
where
    P: LineParser,
    F: FnMut(P::Record) + Send,
{
    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]) {
        match stream {
            StreamKind::Stdout => {
                for record in self.stdout.push_chunk(chunk) {
                    (self.on_progress)(record);
                }
            }
            StreamKind::Stderr => {
                self.stderr.push_chunk(chunk);
            }
        }
    }
}

static DOWNLOAD_PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+.*\s+at\s+(\S+)\s+ETA\s+(\S+)")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub percent: f64,
    pub speed: String,
    pub eta: String,
}

/// Extractor progress lines: `[download]  42.3% of 50.00MiB at 1.23MiB/s ETA 00:30`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadProgressParser;

impl LineParser for DownloadProgressParser {
    type Record = DownloadProgress;

    fn parse_line(&mut self, line: &str) -> LineOutcome<DownloadProgress> {
        let Some(caps) = DOWNLOAD_PROGRESS_RE.captures(line) else {
            return LineOutcome::Log;
        };
        match caps[1].parse::<f64>() {
            Ok(percent) => LineOutcome::Progress(DownloadProgress {
                percent,
                speed: caps[2].to_string(),
                eta: caps[3].to_string(),
            }),
            Err(_) => LineOutcome::Log,
        }
    }
}

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\w+)=(.+)$").unwrap());

/// One `-progress` block from the transcoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Accumulates `key=value` lines and yields the whole block on `progress=continue|end`.
#[derive(Debug, Default, Clone)]
pub struct MergeProgressParser {
    current: MergeProgress,
}

impl LineParser for MergeProgressParser {
    type Record = MergeProgress;

    fn parse_line(&mut self, line: &str) -> LineOutcome<MergeProgress> {
        let Some(caps) = KEY_VALUE_RE.captures(line) else {
            return LineOutcome::Log;
        };
        let value = caps[2].trim();
        let current = &mut self.current;

        // Values that do not parse leave the key unset.
        match &caps[1] {
            "frame" => current.frame = value.parse().ok().or(current.frame),
            "fps" => current.fps = value.parse().ok().or(current.fps),
            "bitrate" => current.bitrate = Some(value.to_string()),
            "total_size" => current.total_size = value.parse().ok().or(current.total_size),
            "out_time_ms" => current.out_time_ms = value.parse().ok().or(current.out_time_ms),
            "out_time" => current.out_time = Some(value.to_string()),
            "speed" => current.speed = Some(value.to_string()),
            "progress" if matches!(value, "continue" | "end") => {
                current.progress = Some(value.to_string());
                return LineOutcome::Progress(std::mem::take(current));
            }
            _ => {}
        }
        LineOutcome::Skip
    }
}

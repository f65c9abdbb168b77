// ABOUTME: Terminal output logging for interactive sessions.
// ABOUTME: Appends shell output to a file, optionally timestamped and stripped of ANSI escapes.

use chrono::Local;
use regex::bytes::Regex;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// CSI, OSC, and charset designation sequences.
const ANSI_PATTERN: &str = r"(?-u)\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[()][0-9A-Za-z]|\x1b[=>]";

/// A trailing escape sequence that has not seen its final byte yet.
const PARTIAL_ANSI_PATTERN: &str = r"(?-u)^\x1b(?:\[[0-?]*[ -/]*|\][^\x07\x1b]*\x1b?|[()])?$";

/// Longest unfinished sequence held back before it is written as is.
const MAX_PENDING: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLogConfig {
    pub path: PathBuf,
    pub timestamp: bool,
    pub remove_ansi_code: bool,
}

struct AnsiFilter {
    complete: Regex,
    partial: Regex,
    pending: Vec<u8>,
}

impl AnsiFilter {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            complete: Regex::new(ANSI_PATTERN)?,
            partial: Regex::new(PARTIAL_ANSI_PATTERN)?,
            pending: Vec::new(),
        })
    }

    /// Strip escapes and carriage returns from `data`, holding back an
    /// unfinished escape at the end until the next chunk arrives.
    fn filter(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(data);

        if let Some(start) = self.unfinished_tail(&buf)
            && buf.len() - start <= MAX_PENDING
        {
            self.pending = buf.split_off(start);
        }
        self.strip(&buf)
    }

    /// Whatever is still held back, stripped as far as possible.
    fn flush(&mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.pending);
        self.strip(&buf)
    }

    /// Start of the first escape not covered by a complete sequence whose
    /// remaining bytes could still grow into one.
    fn unfinished_tail(&self, buf: &[u8]) -> Option<usize> {
        let complete: Vec<_> = self.complete.find_iter(buf).map(|m| m.range()).collect();
        buf.iter()
            .enumerate()
            .filter(|&(pos, &b)| b == 0x1b && !complete.iter().any(|r| r.contains(&pos)))
            .map(|(pos, _)| pos)
            .find(|&pos| self.partial.is_match(&buf[pos..]))
    }

    fn strip(&self, buf: &[u8]) -> Vec<u8> {
        self.complete
            .replace_all(buf, &b""[..])
            .iter()
            .copied()
            .filter(|b| *b != b'\r')
            .collect()
    }
}

pub(crate) struct SessionLog {
    file: File,
    timestamp: bool,
    ansi: Option<AnsiFilter>,
    at_line_start: bool,
}

impl SessionLog {
    pub(crate) async fn open(config: &SessionLogConfig) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .await?;

        let ansi = if config.remove_ansi_code {
            Some(AnsiFilter::new().map_err(std::io::Error::other)?)
        } else {
            None
        };

        Ok(Self {
            file,
            timestamp: config.timestamp,
            ansi,
            at_line_start: true,
        })
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let data = match &mut self.ansi {
            Some(filter) => filter.filter(data),
            None => data.to_vec(),
        };
        self.append(data).await
    }

    /// Write out any held-back bytes and flush the file.
    pub(crate) async fn finish(&mut self) -> std::io::Result<()> {
        if let Some(filter) = &mut self.ansi {
            let rest = filter.flush();
            self.append(rest).await?;
        }
        self.file.flush().await
    }

    async fn append(&mut self, data: Vec<u8>) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let out = if self.timestamp {
            self.stamp_lines(&data)
        } else {
            data
        };
        self.file.write_all(&out).await?;
        self.file.flush().await
    }

    fn stamp_lines(&mut self, data: &[u8]) -> Vec<u8> {
        let prefix = Local::now().format("%Y/%m/%d %H:%M:%S ").to_string();
        let mut out = Vec::with_capacity(data.len() + prefix.len());

        for &byte in data {
            if self.at_line_start {
                out.extend_from_slice(prefix.as_bytes());
                self.at_line_start = false;
            }
            out.push(byte);
            if byte == b'\n' {
                self.at_line_start = true;
            }
        }
        out
    }
}

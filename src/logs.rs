use chrono::{DateTime, Utc};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// LogLevel — detected from captured output text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

static LOG_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b(trace|debug|info|warn(?:ing)?|error)\b"#).unwrap());

/// Detect log level from a line of captured output.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    LOG_LEVEL_RE.find(text).and_then(|m| {
        let s = m.as_str().to_lowercase();
        match s.as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    })
}

// ---------------------------------------------------------------------------
// LogLine — one captured line of child-process output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub stream: LogStream,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl LogLine {
    pub fn capture(service: &str, stream: LogStream, text: String) -> Self {
        let level = detect_log_level(&text);
        Self {
            timestamp: Utc::now(),
            service: service.to_string(),
            stream,
            text,
            level,
        }
    }
}

// ---------------------------------------------------------------------------
// LogWriter — colored terminal sink for captured output
// ---------------------------------------------------------------------------

const SERVICE_COLORS: &[fn(&str) -> String] = &[
    |s| format!("{}", s.cyan()),
    |s| format!("{}", s.yellow()),
    |s| format!("{}", s.green()),
    |s| format!("{}", s.magenta()),
    |s| format!("{}", s.blue()),
    |s| format!("{}", s.red()),
];

pub struct LogWriter {
    rx: broadcast::Receiver<LogLine>,
    max_name_len: usize,
    use_color: bool,
}

impl LogWriter {
    pub fn new(rx: broadcast::Receiver<LogLine>, max_name_len: usize) -> Self {
        Self {
            rx,
            max_name_len,
            use_color: std::io::stdout().is_terminal(),
        }
    }

    pub async fn run(mut self) {
        let mut color_map: BTreeMap<String, usize> = BTreeMap::new();
        let mut next_color = 0usize;

        loop {
            let line = match self.rx.recv().await {
                Ok(line) => line,
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            };

            let idx = *color_map.entry(line.service.clone()).or_insert_with(|| {
                let idx = next_color % SERVICE_COLORS.len();
                next_color += 1;
                idx
            });

            let name = format!("{:<width$}", line.service, width = self.max_name_len);
            let name = if self.use_color {
                SERVICE_COLORS[idx](&name)
            } else {
                name
            };

            if line.stream == LogStream::Stderr && self.use_color {
                println!("{} | {}", name, line.text.dimmed());
            } else {
                println!("{} | {}", name, line.text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_levels() {
        assert_eq!(detect_log_level("ERROR: boom"), Some(LogLevel::Error));
        assert_eq!(detect_log_level("2024 warn something"), Some(LogLevel::Warn));
        assert_eq!(detect_log_level("Warning: deprecated"), Some(LogLevel::Warn));
        assert_eq!(detect_log_level("[INFO] listening"), Some(LogLevel::Info));
        assert_eq!(detect_log_level("plain text line"), None);
    }

    #[test]
    fn capture_tags_stream_and_level() {
        let line = LogLine::capture("backend", LogStream::Stderr, "error: failed".into());
        assert_eq!(line.service, "backend");
        assert_eq!(line.stream, LogStream::Stderr);
        assert_eq!(line.level, Some(LogLevel::Error));
    }

    #[test]
    fn log_line_serializes() {
        let line = LogLine::capture("api", LogStream::Stdout, "listening on 3000".into());
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.contains("\"stream\":\"stdout\""));
        assert!(json.contains("\"service\":\"api\""));
    }
}

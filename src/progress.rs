//! Index and scan progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts that
//! consume query results.

use std::io::Write;
use std::path::PathBuf;

/// A single progress event from the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Listing archives under these roots. Total unknown.
    Discovering { roots: Vec<PathBuf> },
    /// Listing finished; `workers` extractions will run concurrently.
    Discovered { files: u64, workers: usize },
    /// `n` of `total` archives done, `fragments` found so far.
    Processing {
        n: u64,
        total: u64,
        fragments: u64,
        current: PathBuf,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress: "processing  1,234 / 5,000 archives  (8,120 fragments)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { roots } => {
                let roots: Vec<String> = roots.iter().map(|r| r.display().to_string()).collect();
                format!("discovering archives in {}...\n", roots.join(", "))
            }
            ProgressEvent::Discovered { files, workers } => format!(
                "found {} archives, {} workers\n",
                format_number(*files),
                workers
            ),
            ProgressEvent::Processing {
                n,
                total,
                fragments,
                ..
            } => format!(
                "processing  {} / {} archives  ({} fragments)\n",
                format_number(*n),
                format_number(*total),
                format_number(*fragments)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { roots } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "roots": roots,
            }),
            ProgressEvent::Discovered { files, workers } => serde_json::json!({
                "event": "progress",
                "phase": "discovered",
                "files": files,
                "workers": workers,
            }),
            ProgressEvent::Processing {
                n,
                total,
                fragments,
                current,
            } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total,
                "fragments": fragments,
                "current": current,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn reporters_accept_every_event() {
        let events = vec![
            ProgressEvent::Discovering {
                roots: vec![PathBuf::from("/data")],
            },
            ProgressEvent::Discovered {
                files: 3,
                workers: 8,
            },
            ProgressEvent::Processing {
                n: 1,
                total: 3,
                fragments: 10,
                current: PathBuf::from("/data/a.mhtml"),
            },
        ];
        for mode in [ProgressMode::Off, ProgressMode::Human, ProgressMode::Json] {
            let reporter = mode.reporter();
            for event in &events {
                reporter.report(event.clone());
            }
        }
    }
}

//! Job progress reporting.
//!
//! Long-running jobs (import, export, content check, dedup) report what they
//! are scanning and how many units they have processed. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::{IsTerminal, Write};

/// A single progress event for a job.
#[derive(Clone, Debug, PartialEq)]
pub enum JobProgressEvent {
    /// The job is reading its input. Total unknown.
    Scanning { job: String },
    /// `n` units processed; `total` when the job knows it.
    Processing {
        job: String,
        n: u64,
        total: Option<u64>,
    },
}

/// Reports job progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: JobProgressEvent);
}

/// Human-friendly progress on stderr: "import en-es  processing  1,234 / 5,000 units".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: JobProgressEvent) {
        let line = match &event {
            JobProgressEvent::Scanning { job } => format!("{}  scanning...\n", job),
            JobProgressEvent::Processing { job, n, total } => match total {
                Some(total) => format!(
                    "{}  processing  {} / {} units\n",
                    job,
                    format_number(*n),
                    format_number(*total)
                ),
                None => format!("{}  processing  {} units\n", job, format_number(*n)),
            },
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: JobProgressEvent) {
        let obj = match &event {
            JobProgressEvent::Scanning { job } => serde_json::json!({
                "event": "progress",
                "job": job,
                "phase": "scanning"
            }),
            JobProgressEvent::Processing { job, n, total } => serde_json::json!({
                "event": "progress",
                "job": job,
                "phase": "processing",
                "n": n,
                "total": total
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
    fn report(&self, _event: JobProgressEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if std::io::stderr().is_terminal() {
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
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every event for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingProgress(pub Mutex<Vec<JobProgressEvent>>);

    impl ProgressReporter for RecordingProgress {
        fn report(&self, event: JobProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let rec = RecordingProgress::default();
        rec.report(JobProgressEvent::Scanning { job: "x".into() });
        rec.report(JobProgressEvent::Processing {
            job: "x".into(),
            n: 2,
            total: None,
        });
        assert_eq!(rec.0.lock().unwrap().len(), 2);
    }
}

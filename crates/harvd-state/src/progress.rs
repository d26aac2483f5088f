use chrono::{DateTime, Utc};
use harvd_domain::time_fmt::{estimate_remaining_secs, format_duration, percentage};

/// Progress arithmetic shared by every long-running service state:
/// current work count, an optional known maximum, and a start
/// timestamp for linear time extrapolation.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReport {
    pub current: u64,
    pub max: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl ProgressReport {
    pub fn new(current: u64, max: Option<u64>, started_at: DateTime<Utc>) -> Self {
        Self { current, max, started_at }
    }

    fn elapsed_millis(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Estimated seconds until the work completes, when computable.
    pub fn remaining_secs(&self) -> Option<u64> {
        let max = self.max?;
        estimate_remaining_secs(self.current, max, self.elapsed_millis())
    }

    /// `"cur/max"`, or `"cur"` when the maximum is unknown.
    pub fn fraction(&self) -> String {
        match self.max {
            Some(max) => format!("{}/{}", self.current, max),
            None => self.current.to_string(),
        }
    }

    /// Human-readable progress line, e.g.
    /// `"12/40 documents (30%), about 15s remaining"`.
    pub fn describe(&self) -> String {
        match self.max {
            Some(max) => {
                let mut out = format!(
                    "{}/{} documents ({}%)",
                    self.current,
                    max,
                    percentage(self.current, max)
                );
                if let Some(secs) = self.remaining_secs() {
                    out.push_str(&format!(", about {} remaining", format_duration(secs)));
                }
                out
            }
            None => format!("{} documents", self.current),
        }
    }
}

//! Download progress reporting.

use std::time::{Duration, Instant};

/// Snapshot of an in-flight download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    /// File being downloaded
    pub file_name: String,
    /// Bytes written so far
    pub bytes_received: u64,
    /// Advertised content length, `None` when the server sent none
    pub total_bytes: Option<u64>,
    /// Throughput averaged over the interval since the previous update
    pub bytes_per_second: f64,
    /// `None` when throughput is zero or the total is unknown
    pub estimated_time_remaining: Option<Duration>,
}

impl DownloadProgress {
    /// Completed fraction in [0, 1] when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_received as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Throttles progress updates to one per interval.
///
/// Updates come out in strictly increasing `bytes_received` order; the
/// final update is only repeated if bytes arrived since the last one.
#[derive(Debug)]
pub struct ProgressTracker {
    file_name: String,
    total_bytes: Option<u64>,
    interval: Duration,
    received: u64,
    last_emit_at: Instant,
    last_emit_bytes: u64,
    emitted_any: bool,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>, total_bytes: Option<u64>, interval: Duration) -> Self {
        Self::starting_at(file_name, total_bytes, interval, Instant::now())
    }

    /// Tracker whose first interval starts at `start`.
    pub fn starting_at(
        file_name: impl Into<String>,
        total_bytes: Option<u64>,
        interval: Duration,
        start: Instant,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            total_bytes,
            interval,
            received: 0,
            last_emit_at: start,
            last_emit_bytes: 0,
            emitted_any: false,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Account for `bytes` more and return an update if the interval elapsed.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<DownloadProgress> {
        self.received += bytes;
        if now.saturating_duration_since(self.last_emit_at) >= self.interval {
            Some(self.emit(now))
        } else {
            None
        }
    }

    /// Final update once the transfer completes.
    pub fn finish(&mut self, now: Instant) -> Option<DownloadProgress> {
        if self.emitted_any && self.last_emit_bytes == self.received {
            return None;
        }
        Some(self.emit(now))
    }

    fn emit(&mut self, now: Instant) -> DownloadProgress {
        let elapsed = now.saturating_duration_since(self.last_emit_at).as_secs_f64();
        let delta = self.received - self.last_emit_bytes;
        let bytes_per_second = if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        };

        let estimated_time_remaining = match self.total_bytes {
            Some(total) if bytes_per_second > 0.0 => {
                let remaining = total.saturating_sub(self.received) as f64;
                Some(Duration::from_secs_f64(remaining / bytes_per_second))
            }
            _ => None,
        };

        self.last_emit_at = now;
        self.last_emit_bytes = self.received;
        self.emitted_any = true;

        DownloadProgress {
            file_name: self.file_name.clone(),
            bytes_received: self.received,
            total_bytes: self.total_bytes,
            bytes_per_second,
            estimated_time_remaining,
        }
    }
}

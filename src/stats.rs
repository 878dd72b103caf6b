//! Run statistics collected by the driver

use std::time::Duration;

/// Timings of one epoch on one rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    pub epoch: u32,
    pub records: u64,
    pub append_time: Duration,
    pub barrier_time: Duration,
    pub flush_time: Duration,
}

/// Totals of a completed run on one rank
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub rank: u32,
    pub epochs: Vec<EpochStats>,
    pub records: u64,
    pub key_bytes: u64,
    pub value_bytes: u64,
    pub open_time: Duration,
    pub finish_time: Duration,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            ..Default::default()
        }
    }

    pub fn epochs_flushed(&self) -> usize {
        self.epochs.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.key_bytes + self.value_bytes
    }

    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.records as f64 / secs
        } else {
            0.0
        }
    }

    pub fn mib_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes() as f64 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        }
    }

    /// Log a summary of the run
    pub fn log_summary(&self) {
        tracing::info!(
            "rank {}: {} epochs, {} records, {} bytes in {:.3}s ({:.0} records/s, {:.2} MiB/s)",
            self.rank,
            self.epochs_flushed(),
            self.records,
            self.total_bytes(),
            self.elapsed.as_secs_f64(),
            self.records_per_sec(),
            self.mib_per_sec()
        );
        for e in &self.epochs {
            tracing::debug!(
                "rank {} epoch {}: {} records, append {:?}, barrier {:?}, flush {:?}",
                self.rank,
                e.epoch,
                e.records,
                e.append_time,
                e.barrier_time,
                e.flush_time
            );
        }
    }
}

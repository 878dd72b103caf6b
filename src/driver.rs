//! Benchmark driver: the per-rank epoch loop
//!
//! For every epoch each rank appends its records, waits on a barrier until
//! every rank has finished appending, and only then flushes the epoch.
//! Epoch `e + 1` is not started before the local flush of `e` returns.
//! Any error ends the run; nothing is retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::config::BenchmarkParameters;
use crate::constants::VALUE_FILLER;
use crate::coordinator::Coordinator;
use crate::error::{BenchError, BenchResult};
use crate::plfsdir::{DirEngine, DirHandle, Env, RemoteEnv, ThreadPool};
use crate::session::{SessionConfig, WriteSession};
use crate::stats::{EpochStats, RunStats};
use crate::watchdog::CancellationToken;

/// Key of the `index`-th record written by `rank`
///
/// Keys are unique across ranks for the same index.
pub fn make_key(index: u32, rank: u32) -> String {
    format!("f{:08x}-r{:08x}", index, rank)
}

/// Filler value of `size` bytes
pub fn make_value(size: u32) -> Vec<u8> {
    vec![VALUE_FILLER; size as usize]
}

/// Start the background pool; zero threads means no pool
pub fn make_thread_pool(threads: u32) -> BenchResult<Option<Arc<ThreadPool>>> {
    if threads == 0 {
        return Ok(None);
    }

    ThreadPool::new(threads as usize)
        .map(|pool| Some(Arc::new(pool)))
        .map_err(|e| BenchError::Coordination(format!("fail to init thread pool: {}", e)))
}

/// Bind the remote backend if it is enabled
pub fn make_remote_env(params: &BenchmarkParameters) -> BenchResult<Option<Arc<dyn Env>>> {
    if !params.remote_backend {
        return Ok(None);
    }

    let env = RemoteEnv::init(&params.remote_host, params.remote_port)?;
    Ok(Some(Arc::new(env)))
}

/// Drives one rank through the whole benchmark
pub struct BenchmarkDriver<'a, C: Coordinator, E: DirEngine> {
    params: &'a BenchmarkParameters,
    coordinator: &'a C,
    engine: E,
    token: CancellationToken,
}

impl<'a, C: Coordinator, E: DirEngine> BenchmarkDriver<'a, C, E> {
    pub fn new(
        params: &'a BenchmarkParameters,
        coordinator: &'a C,
        engine: E,
        token: CancellationToken,
    ) -> Self {
        Self {
            params,
            coordinator,
            engine,
            token,
        }
    }

    fn check_cancelled(&self) -> BenchResult<()> {
        self.token.check(self.params.timeout_secs)
    }

    /// Run the benchmark on this rank
    ///
    /// The session is finished only if every epoch completed before the run
    /// was cancelled. On error the session is dropped, which releases the
    /// handle without finishing.
    #[instrument(level = "info", name = "plfsdir_write", skip(self), fields(rank = self.params.rank))]
    pub fn run(&self) -> BenchResult<RunStats> {
        let params = self.params;
        let start = Instant::now();
        let mut stats = RunStats::new(params.rank);

        let config = SessionConfig::build(params)?;
        let pool = make_thread_pool(params.bg_threads)?;
        let env = make_remote_env(params)?;

        // Every rank is ready before anyone creates its partition
        self.coordinator.barrier()?;

        let open_start = Instant::now();
        let mut session: WriteSession<E::Handle> = WriteSession::new();
        session.open(&self.engine, &params.dir, &config, pool, env)?;
        stats.open_time = open_start.elapsed();

        let value = make_value(params.value_size);
        for epoch in 0..params.epochs {
            let epoch_stats = self.write_epoch(&mut session, epoch, &value, &mut stats)?;
            stats.epochs.push(epoch_stats);
        }

        // A deadline that passed during the last flush still aborts the run
        self.check_cancelled()?;
        let finish_start = Instant::now();
        session.finish()?;
        stats.finish_time = finish_start.elapsed();
        stats.elapsed = start.elapsed();

        Ok(stats)
    }

    fn write_epoch<H: DirHandle>(
        &self,
        session: &mut WriteSession<H>,
        epoch: u32,
        value: &[u8],
        stats: &mut RunStats,
    ) -> BenchResult<EpochStats> {
        self.check_cancelled()?;
        let mut epoch_stats = EpochStats {
            epoch,
            ..Default::default()
        };

        let append_start = Instant::now();
        for i in 0..self.params.keys_per_epoch {
            let key = make_key(i, self.params.rank);
            session.append(&key, epoch, value)?;
            stats.key_bytes += key.len() as u64;
            stats.value_bytes += value.len() as u64;
        }
        epoch_stats.records = u64::from(self.params.keys_per_epoch);
        stats.records += epoch_stats.records;
        epoch_stats.append_time = append_start.elapsed();

        let barrier_start = Instant::now();
        self.coordinator.barrier()?;
        epoch_stats.barrier_time = barrier_start.elapsed();

        self.check_cancelled()?;
        let flush_start = Instant::now();
        session.epoch_flush(epoch)?;
        epoch_stats.flush_time = flush_start.elapsed();

        if self.params.verbose && self.params.is_root() {
            tracing::info!(
                "epoch {} done ({} keys per rank, flush {:.3}ms)",
                epoch,
                self.params.keys_per_epoch,
                duration_ms(epoch_stats.flush_time)
            );
        }

        Ok(epoch_stats)
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(make_key(5, 2), "f00000005-r00000002");
        assert_eq!(make_key(5, 2), make_key(5, 2));
        assert_ne!(make_key(5, 2), make_key(5, 3));
        assert_ne!(make_key(5, 2), make_key(6, 2));
    }

    #[test]
    fn test_key_format_is_fixed_width() {
        assert_eq!(make_key(0, 0).len(), make_key(u32::MAX, u32::MAX).len());
        assert_eq!(make_key(u32::MAX, 0xab), "fffffffff-r000000ab");
    }

    #[test]
    fn test_filler_value() {
        assert!(make_value(0).is_empty());
        assert_eq!(make_value(4), b"....");
    }

    #[test]
    fn test_zero_threads_means_no_pool() {
        assert!(make_thread_pool(0).unwrap().is_none());
        let pool = make_thread_pool(2).unwrap().unwrap();
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_remote_env_only_when_enabled() {
        let mut params = BenchmarkParameters::default();
        assert!(make_remote_env(&params).unwrap().is_none());

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        params.remote_backend = true;
        params.remote_port = port;
        assert!(matches!(
            make_remote_env(&params),
            Err(BenchError::EnvInit { .. })
        ));
    }
}

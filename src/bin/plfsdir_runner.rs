//! plfsdir runner
//!
//! Writes `-e` epochs of `-n` keys per rank into a plfsdir, flushing each
//! epoch after a group-wide barrier.
//!
//! Usage:
//!   mpirun -n <ranks> plfsdir_runner [options] <plfsdir> [bbos_host] [bbos_port]
//!
//! Without the `mpi` feature the runner is a single rank.

use plfsdir_bench::config::{defaults, BenchmarkParameters};
use plfsdir_bench::coordinator::Coordinator;
use plfsdir_bench::driver::BenchmarkDriver;
use plfsdir_bench::error::{BenchError, BenchResult};
use plfsdir_bench::logging::{init_with_chrome_trace, init_with_rank, rank_log_level, rank_trace_path};
use plfsdir_bench::plfsdir::LogDirEngine;
use plfsdir_bench::signals::setup_signal_handlers;
use plfsdir_bench::watchdog::{CancellationToken, Watchdog};

use clap::Parser;

use std::path::PathBuf;
use std::time::Duration;

/// Bulk epoch writes into a plfsdir
#[derive(Parser, Debug)]
#[command(name = "plfsdir_runner")]
#[command(about = "Epoch-synchronized bulk write benchmark for plfsdirs")]
struct Args {
    /// plfsdir path
    dir: PathBuf,

    /// Remote backend (bbos) hostname
    bbos_host: Option<String>,

    /// Remote backend (bbos) port
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    bbos_port: Option<u16>,

    /// Engine I/O buffer size in bytes
    #[arg(short = 's', value_name = "IOSIZE", value_parser = clap::value_parser!(u32).range(1..))]
    io_size: Option<u32>,

    /// Number of epochs
    #[arg(short = 'e', value_name = "EPOCHS")]
    epochs: Option<u32>,

    /// Keys per epoch (per rank)
    #[arg(short = 'n', value_name = "KEYS")]
    keys: Option<u32>,

    /// Bloom filter bits per key
    #[arg(short = 'f', value_name = "BITS")]
    filter_bits: Option<u32>,

    /// Key size in bytes
    #[arg(short = 'k', value_name = "KEYSIZE", value_parser = clap::value_parser!(u32).range(1..))]
    key_size: Option<u32>,

    /// Value size in bytes
    #[arg(short = 'd', value_name = "VALSIZE")]
    value_size: Option<u32>,

    /// Background worker threads
    #[arg(short = 'j', value_name = "THREADS")]
    bg_threads: Option<u32>,

    /// Timeout (alarm) in seconds, 0 disables it
    #[arg(short = 't', value_name = "SEC")]
    timeout: Option<u64>,

    /// Rotate the data log at every epoch
    #[arg(short = 'r')]
    log_rotation: bool,

    /// Write through the remote backend
    #[arg(short = 'b')]
    bbos: bool,

    /// Be verbose
    #[arg(short = 'v')]
    verbose: bool,

    /// TOML parameter file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chrome trace output (one file per rank)
    #[arg(long)]
    trace_output: Option<PathBuf>,
}

fn main() {
    let argv0 = std::env::args()
        .next()
        .unwrap_or_else(|| "plfsdir_runner".to_string());

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    #[cfg(feature = "mpi")]
    let coordinator = plfsdir_bench::coordinator::MpiCoordinator::init();
    #[cfg(not(feature = "mpi"))]
    let coordinator: BenchResult<_> = Ok(plfsdir_bench::coordinator::SoloCoordinator);

    let code = match coordinator {
        Ok(coordinator) => {
            let result = run(&args, &argv0, &coordinator);
            conclude(coordinator, result, &argv0)
        }
        Err(e) => {
            eprintln!("!!! ERROR !!! {}: {}", argv0, e);
            1
        }
    };
    std::process::exit(code);
}

/// Exit status of this rank
///
/// Only a successful rank takes part in the collective teardown. A failed
/// rank reports its error and leaves without finalizing, since its peers
/// may still be waiting in a barrier.
fn conclude<C: Coordinator>(coordinator: C, result: BenchResult<()>, argv0: &str) -> i32 {
    match result {
        Ok(()) => {
            coordinator.finalize();
            0
        }
        Err(e) => {
            eprintln!("!!! ERROR !!! {}: {}", argv0, e);
            std::mem::forget(coordinator);
            1
        }
    }
}

fn run<C: Coordinator>(args: &Args, argv0: &str, coordinator: &C) -> BenchResult<()> {
    let params = resolve_params(args, coordinator.rank(), coordinator.size())?;

    let level = if params.verbose {
        "debug"
    } else {
        defaults::default_log_level()
    };
    let level = rank_log_level(level, params.rank);
    let _trace_guard = match &args.trace_output {
        Some(path) => Some(init_with_chrome_trace(
            level,
            params.rank,
            &rank_trace_path(path, params.rank),
        )),
        None => {
            init_with_rank(level, params.rank);
            None
        }
    };

    params.print_options(argv0);

    let token = CancellationToken::new();
    setup_signal_handlers(token.clone());

    let watchdog = if params.timeout_secs > 0 {
        let watchdog = Watchdog::arm(Duration::from_secs(params.timeout_secs), token.clone())
            .map_err(|e| BenchError::Coordination(format!("fail to arm watchdog: {}", e)))?;
        Some(watchdog)
    } else {
        tracing::warn!("timeout 0: watchdog disabled");
        None
    };

    if params.verbose && params.is_root() {
        tracing::info!("test begins ...");
    }

    let driver = BenchmarkDriver::new(&params, coordinator, LogDirEngine, token.clone());
    let stats = driver.run()?;

    if let Some(watchdog) = watchdog {
        watchdog.disarm();
    }
    // The deadline may have passed while the directory was being finished
    token.check(params.timeout_secs)?;

    stats.log_summary();

    if params.verbose && params.is_root() {
        tracing::info!("all done!");
        tracing::info!("bye");
    }

    Ok(())
}

/// Defaults, then the optional parameter file, then explicit flags
fn resolve_params(args: &Args, rank: u32, world_size: u32) -> BenchResult<BenchmarkParameters> {
    let mut params = match &args.config {
        Some(path) => BenchmarkParameters::from_file(path)?,
        None => BenchmarkParameters::default(),
    };

    params.dir = args.dir.clone();
    if let Some(host) = &args.bbos_host {
        params.remote_host = host.clone();
    }
    if let Some(port) = args.bbos_port {
        params.remote_port = port;
    }
    if let Some(io_size) = args.io_size {
        params.io_size = io_size;
    }
    if let Some(epochs) = args.epochs {
        params.epochs = epochs;
    }
    if let Some(keys) = args.keys {
        params.keys_per_epoch = keys;
    }
    if let Some(filter_bits) = args.filter_bits {
        params.filter_bits = filter_bits;
    }
    if let Some(key_size) = args.key_size {
        params.key_size = key_size;
    }
    if let Some(value_size) = args.value_size {
        params.value_size = value_size;
    }
    if let Some(bg_threads) = args.bg_threads {
        params.bg_threads = bg_threads;
    }
    if let Some(timeout) = args.timeout {
        params.timeout_secs = timeout;
    }
    params.log_rotation |= args.log_rotation;
    params.remote_backend |= args.bbos;
    params.verbose |= args.verbose;

    let params = params.with_rank(rank, world_size);
    params.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("plfsdir_runner").chain(argv.iter().copied()))
    }

    #[test]
    fn test_short_flags() {
        let args = parse(&[
            "-s", "4096", "-e", "2", "-n", "4", "-f", "12", "-k", "16", "-d", "0", "-j", "2",
            "-t", "30", "-r", "-b", "-v", "/tmp/plfs", "10.0.0.1", "4000",
        ])
        .unwrap();
        let params = resolve_params(&args, 1, 2).unwrap();

        assert_eq!(params.dir, PathBuf::from("/tmp/plfs"));
        assert_eq!(params.io_size, 4096);
        assert_eq!(params.epochs, 2);
        assert_eq!(params.keys_per_epoch, 4);
        assert_eq!(params.filter_bits, 12);
        assert_eq!(params.key_size, 16);
        assert_eq!(params.value_size, 0);
        assert_eq!(params.bg_threads, 2);
        assert_eq!(params.timeout_secs, 30);
        assert!(params.log_rotation && params.remote_backend && params.verbose);
        assert_eq!(params.remote_host, "10.0.0.1");
        assert_eq!(params.remote_port, 4000);
        assert_eq!((params.rank, params.world_size), (1, 2));
    }

    #[test]
    fn test_defaults_without_flags() {
        let args = parse(&["/tmp/plfs"]).unwrap();
        let params = resolve_params(&args, 0, 1).unwrap();

        assert_eq!(params.epochs, defaults::NUM_EPOCHS);
        assert_eq!(params.timeout_secs, defaults::TIMEOUT_SECS);
        assert_eq!(params.remote_host, defaults::remote_host());
        assert!(!params.remote_backend);
    }

    #[test]
    fn test_usage_errors() {
        // plfsdir is required
        assert!(parse(&[]).is_err());
        assert!(parse(&["-s", "0", "/tmp/plfs"]).is_err());
        assert!(parse(&["-k", "0", "/tmp/plfs"]).is_err());
        assert!(parse(&["-e", "-1", "/tmp/plfs"]).is_err());
        assert!(parse(&["/tmp/plfs", "host", "0"]).is_err());
        assert!(parse(&["-x", "/tmp/plfs"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("params.toml");
        std::fs::write(&path, "epochs = 3\nkeys_per_epoch = 7\n").unwrap();

        let config = path.to_str().unwrap();
        let args = parse(&["--config", config, "-e", "5", "/tmp/plfs"]).unwrap();
        let params = resolve_params(&args, 0, 1).unwrap();

        assert_eq!(params.epochs, 5);
        assert_eq!(params.keys_per_epoch, 7);
    }

    /// Coordinator that counts teardown calls
    struct CountingCoordinator {
        finalized: Rc<Cell<usize>>,
        dropped: Rc<Cell<usize>>,
    }

    impl Coordinator for CountingCoordinator {
        fn rank(&self) -> u32 {
            0
        }

        fn size(&self) -> u32 {
            2
        }

        fn barrier(&self) -> BenchResult<()> {
            Ok(())
        }

        fn finalize(self) {
            self.finalized.set(self.finalized.get() + 1);
        }
    }

    impl Drop for CountingCoordinator {
        fn drop(&mut self) {
            self.dropped.set(self.dropped.get() + 1);
        }
    }

    fn counting_coordinator() -> (CountingCoordinator, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let finalized = Rc::new(Cell::new(0));
        let dropped = Rc::new(Cell::new(0));
        let coordinator = CountingCoordinator {
            finalized: finalized.clone(),
            dropped: dropped.clone(),
        };
        (coordinator, finalized, dropped)
    }

    #[test]
    fn test_successful_rank_finalizes() {
        let (coordinator, finalized, dropped) = counting_coordinator();
        assert_eq!(conclude(coordinator, Ok(()), "plfsdir_runner"), 0);
        assert_eq!(finalized.get(), 1);
        assert_eq!(dropped.get(), 1);
    }

    #[test]
    fn test_failed_rank_skips_teardown() {
        let (coordinator, finalized, dropped) = counting_coordinator();
        let err = BenchError::Flush {
            epoch: 1,
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space"),
        };

        assert_eq!(conclude(coordinator, Err(err), "plfsdir_runner"), 1);
        assert_eq!(finalized.get(), 0);
        assert_eq!(dropped.get(), 0);
    }

    #[test]
    fn test_missing_config_file_is_usage_error() {
        let args = parse(&["--config", "/nonexistent/params.toml", "/tmp/plfs"]).unwrap();
        assert!(matches!(
            resolve_params(&args, 0, 1),
            Err(BenchError::Usage(_))
        ));
    }
}

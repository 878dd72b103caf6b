//! plfsdir-bench - Epoch-Synchronized Write Benchmark for Partitioned Log Directories
//!
//! Every rank of a process group streams synthetic keyed records into its
//! own partition of a log-structured directory ("plfsdir") and the group
//! flushes each epoch together:
//!
//! - **Session descriptor** ([`session::conf`]): benchmark parameters are
//!   rendered into the engine's fixed `key=value&...` configuration string
//! - **Write session** ([`session`]): the `Unopened -> Open -> Finished`
//!   lifecycle around one engine handle
//! - **Coordination** ([`coordinator`]): rank discovery and the barrier that
//!   separates the appends of an epoch from its flush
//! - **Driver** ([`driver`]): the per-rank epoch loop
//! - **Watchdog** ([`watchdog`]): a deadline that bounds the whole run
//! - **Engine binding** ([`plfsdir`]): the handle traits plus a local
//!   log-structured implementation and the remote backend environment
//!
//! # Example
//!
//! ```rust,no_run
//! use plfsdir_bench::config::BenchmarkParameters;
//! use plfsdir_bench::coordinator::SoloCoordinator;
//! use plfsdir_bench::driver::BenchmarkDriver;
//! use plfsdir_bench::plfsdir::LogDirEngine;
//! use plfsdir_bench::watchdog::CancellationToken;
//!
//! # fn example() -> Result<(), plfsdir_bench::error::BenchError> {
//! let mut params = BenchmarkParameters::default();
//! params.dir = "/tmp/plfsdir".into();
//! params.epochs = 2;
//!
//! let coordinator = SoloCoordinator;
//! let driver = BenchmarkDriver::new(&params, &coordinator, LogDirEngine, CancellationToken::new());
//! let stats = driver.run()?;
//! assert_eq!(stats.epochs_flushed(), 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod logging;
pub mod plfsdir;
pub mod session;
pub mod signals;
pub mod stats;
pub mod watchdog;

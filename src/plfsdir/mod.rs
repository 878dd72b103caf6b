//! Storage engine binding
//!
//! The benchmark talks to the partitioned log-structured directory through
//! two traits: [`DirEngine`] creates handles from a session descriptor and
//! [`DirHandle`] is one open directory partition. Dropping a handle frees
//! it; an unfinished handle is abandoned without writing a footer.
//!
//! Note: handles are owned by exactly one rank and driven from a single
//! thread. The only other threads involved are the engine's own background
//! workers.

pub mod env;
pub mod filter;
pub mod log_dir;
pub mod options;
pub mod thread_pool;

pub use env::{Env, LocalEnv, RemoteEnv, WritableFile};
pub use log_dir::{LogDirEngine, LogDirHandle};
pub use options::DirOptions;
pub use thread_pool::ThreadPool;

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::session::SessionConfig;

/// Callback receiving engine diagnostics
pub type ErrPrinter = Arc<dyn Fn(&str) + Send + Sync>;

/// Open mode of a directory handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    WriteOnly,
    ReadOnly,
}

/// Factory for directory handles
pub trait DirEngine {
    type Handle: DirHandle;

    /// Create a handle bound to `conf`. The handle is not open yet.
    fn create_handle(&self, conf: &SessionConfig, mode: OpenMode) -> io::Result<Self::Handle>;
}

/// One rank's partition of a plfsdir
pub trait DirHandle {
    fn set_err_printer(&mut self, printer: ErrPrinter);

    fn set_thread_pool(&mut self, pool: Arc<ThreadPool>);

    fn set_env(&mut self, env: Arc<dyn Env>);

    fn open(&mut self, path: &Path) -> io::Result<()>;

    /// Append one record tagged with `epoch`
    fn append(&mut self, key: &str, epoch: u32, value: &[u8]) -> io::Result<()>;

    /// Persist every record appended up to and including `epoch`
    fn epoch_flush(&mut self, epoch: u32) -> io::Result<()>;

    /// Close all epochs and write the directory footer
    fn finish(&mut self) -> io::Result<()>;
}

/// Error printer that forwards engine diagnostics to stderr
pub fn stderr_err_printer() -> ErrPrinter {
    Arc::new(|msg: &str| {
        eprintln!(" >> [plfsdir] {}", msg);
        tracing::warn!(target: "plfsdir", "{}", msg);
    })
}

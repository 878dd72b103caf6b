//! Write session: one rank's open plfsdir handle
//!
//! A session moves `Unopened -> Open -> Finished` and never back. Appends
//! and flushes are only accepted while `Open`, epochs are flushed in
//! strictly increasing order and a flushed epoch accepts no more records.
//!
//! Dropping a session releases the engine handle on every path. Only the
//! clean path runs `finish`; a session dropped while `Open` (an aborted
//! run) is abandoned and the directory is left without a footer.

pub mod conf;

pub use conf::SessionConfig;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::instrument;

use crate::error::{BenchError, BenchResult};
use crate::plfsdir::{stderr_err_printer, DirEngine, DirHandle, Env, OpenMode, ThreadPool};

/// Lifecycle state of a [`WriteSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Finished,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unopened => write!(f, "unopened"),
            SessionState::Open => write!(f, "open"),
            SessionState::Finished => write!(f, "finished"),
        }
    }
}

/// Owned storage-engine session for one rank
pub struct WriteSession<H: DirHandle> {
    state: SessionState,
    handle: Option<H>,
    path: Option<PathBuf>,
    pool: Option<Arc<ThreadPool>>,
    env: Option<Arc<dyn Env>>,
    /// Last flushed epoch, `None` before the first flush
    last_flushed: Option<u32>,
    /// Highest epoch appended since the last flush
    pending_epoch: Option<u32>,
}

impl<H: DirHandle> Default for WriteSession<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: DirHandle> WriteSession<H> {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unopened,
            handle: None,
            path: None,
            pool: None,
            env: None,
            last_flushed: None,
            pending_epoch: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn last_flushed(&self) -> Option<u32> {
        self.last_flushed
    }

    pub fn has_thread_pool(&self) -> bool {
        self.pool.is_some()
    }

    pub fn has_env(&self) -> bool {
        self.env.is_some()
    }

    fn require_open(&self, op: &'static str) -> BenchResult<()> {
        if self.state != SessionState::Open {
            return Err(BenchError::InvalidState {
                op,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn check_epoch(&self, op: &'static str, epoch: u32) -> BenchResult<()> {
        match self.last_flushed {
            Some(last) if epoch <= last => Err(BenchError::InvalidState {
                op,
                state: format!("epoch {} already flushed", last),
            }),
            _ => Ok(()),
        }
    }

    /// Create the engine handle for `config` and open `path`
    ///
    /// On failure the session stays `Unopened` and the half-built handle is
    /// released.
    #[instrument(level = "debug", skip(self, engine, config, pool, env), fields(path = %path.display()))]
    pub fn open<E>(
        &mut self,
        engine: &E,
        path: &Path,
        config: &SessionConfig,
        pool: Option<Arc<ThreadPool>>,
        env: Option<Arc<dyn Env>>,
    ) -> BenchResult<()>
    where
        E: DirEngine<Handle = H>,
    {
        if self.state != SessionState::Unopened {
            return Err(BenchError::InvalidState {
                op: "open",
                state: self.state.to_string(),
            });
        }

        let open_error = |source| BenchError::Open {
            path: path.to_path_buf(),
            source,
        };

        let mut handle = engine
            .create_handle(config, OpenMode::WriteOnly)
            .map_err(open_error)?;
        handle.set_err_printer(stderr_err_printer());
        if let Some(pool) = &pool {
            handle.set_thread_pool(pool.clone());
        }
        if let Some(env) = &env {
            handle.set_env(env.clone());
        }

        handle.open(path).map_err(open_error)?;

        tracing::debug!("session opened");
        self.handle = Some(handle);
        self.path = Some(path.to_path_buf());
        self.pool = pool;
        self.env = env;
        self.state = SessionState::Open;
        Ok(())
    }

    /// Append one record to `epoch`
    pub fn append(&mut self, key: &str, epoch: u32, value: &[u8]) -> BenchResult<()> {
        self.require_open("append")?;
        self.check_epoch("append", epoch)?;

        let handle = self.handle_mut("append")?;
        handle
            .append(key, epoch, value)
            .map_err(|source| BenchError::Write {
                key: key.to_string(),
                epoch,
                source,
            })?;

        self.pending_epoch = Some(self.pending_epoch.map_or(epoch, |e| e.max(epoch)));
        Ok(())
    }

    /// Persist every record appended to `epoch`
    #[instrument(level = "debug", skip(self))]
    pub fn epoch_flush(&mut self, epoch: u32) -> BenchResult<()> {
        self.require_open("epoch flush")?;
        self.check_epoch("epoch flush", epoch)?;
        if let Some(pending) = self.pending_epoch {
            if pending > epoch {
                return Err(BenchError::InvalidState {
                    op: "epoch flush",
                    state: format!("records pending for later epoch {}", pending),
                });
            }
        }

        let handle = self.handle_mut("epoch flush")?;
        handle
            .epoch_flush(epoch)
            .map_err(|source| BenchError::Flush { epoch, source })?;

        self.last_flushed = Some(epoch);
        self.pending_epoch = None;
        Ok(())
    }

    /// Finalize the directory and release the handle
    ///
    /// The session is `Finished` afterwards even if the engine reports an
    /// error; the handle is never reused.
    #[instrument(level = "debug", skip(self))]
    pub fn finish(&mut self) -> BenchResult<()> {
        self.require_open("finish")?;

        self.state = SessionState::Finished;
        let mut handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                return Err(BenchError::InvalidState {
                    op: "finish",
                    state: "open without handle".to_string(),
                })
            }
        };

        let result = handle
            .finish()
            .map_err(|source| BenchError::Finish { source });
        drop(handle);
        self.pool = None;
        self.env = None;

        if result.is_ok() {
            tracing::debug!("session finished");
        }
        result
    }

    fn handle_mut(&mut self, op: &'static str) -> BenchResult<&mut H> {
        self.handle.as_mut().ok_or_else(|| BenchError::InvalidState {
            op,
            state: "open without handle".to_string(),
        })
    }
}

impl<H: DirHandle> Drop for WriteSession<H> {
    fn drop(&mut self) {
        if self.state == SessionState::Open {
            tracing::warn!(
                "abandoning open session on {} (last flushed epoch {:?})",
                self.path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                self.last_flushed
            );
        }
        // Handle first: it may still reference the pool and env
        self.handle.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchmarkParameters;
    use crate::plfsdir::{ErrPrinter, LogDirEngine, LogDirHandle};
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Handle that records calls and fails on demand
    struct ScriptedHandle {
        calls: Rc<RefCell<Vec<String>>>,
        fail_open: bool,
        fail_flush: bool,
    }

    impl DirHandle for ScriptedHandle {
        fn set_err_printer(&mut self, _printer: ErrPrinter) {}

        fn set_thread_pool(&mut self, _pool: Arc<ThreadPool>) {
            self.calls.borrow_mut().push("pool".to_string());
        }

        fn set_env(&mut self, _env: Arc<dyn Env>) {
            self.calls.borrow_mut().push("env".to_string());
        }

        fn open(&mut self, _path: &Path) -> io::Result<()> {
            if self.fail_open {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            self.calls.borrow_mut().push("open".to_string());
            Ok(())
        }

        fn append(&mut self, key: &str, epoch: u32, _value: &[u8]) -> io::Result<()> {
            self.calls.borrow_mut().push(format!("append {} {}", key, epoch));
            Ok(())
        }

        fn epoch_flush(&mut self, epoch: u32) -> io::Result<()> {
            if self.fail_flush {
                return Err(io::Error::new(io::ErrorKind::Other, "no space"));
            }
            self.calls.borrow_mut().push(format!("flush {}", epoch));
            Ok(())
        }

        fn finish(&mut self) -> io::Result<()> {
            self.calls.borrow_mut().push("finish".to_string());
            Ok(())
        }
    }

    impl Drop for ScriptedHandle {
        fn drop(&mut self) {
            self.calls.borrow_mut().push("free".to_string());
        }
    }

    #[derive(Default)]
    struct ScriptedEngine {
        calls: Rc<RefCell<Vec<String>>>,
        fail_open: bool,
        fail_flush: bool,
    }

    impl DirEngine for ScriptedEngine {
        type Handle = ScriptedHandle;

        fn create_handle(&self, _conf: &SessionConfig, _mode: OpenMode) -> io::Result<ScriptedHandle> {
            Ok(ScriptedHandle {
                calls: self.calls.clone(),
                fail_open: self.fail_open,
                fail_flush: self.fail_flush,
            })
        }
    }

    fn conf() -> SessionConfig {
        SessionConfig::build(&BenchmarkParameters::default()).unwrap()
    }

    fn open_session(engine: &ScriptedEngine) -> WriteSession<ScriptedHandle> {
        let mut session = WriteSession::new();
        session
            .open(engine, Path::new("/plfs"), &conf(), None, None)
            .unwrap();
        session
    }

    #[test]
    fn test_rejects_operations_before_open() {
        let mut session: WriteSession<ScriptedHandle> = WriteSession::new();
        assert_eq!(session.state(), SessionState::Unopened);

        assert!(matches!(
            session.append("k", 0, b"v"),
            Err(BenchError::InvalidState { op: "append", .. })
        ));
        assert!(matches!(
            session.epoch_flush(0),
            Err(BenchError::InvalidState { op: "epoch flush", .. })
        ));
        assert!(matches!(
            session.finish(),
            Err(BenchError::InvalidState { op: "finish", .. })
        ));
    }

    #[test]
    fn test_rejects_operations_after_finish() {
        let engine = ScriptedEngine::default();
        let mut session = open_session(&engine);
        session.finish().unwrap();
        assert_eq!(session.state(), SessionState::Finished);

        assert!(session.append("k", 0, b"v").is_err());
        assert!(session.epoch_flush(0).is_err());
        assert!(session.finish().is_err());
        assert!(session
            .open(&engine, Path::new("/plfs"), &conf(), None, None)
            .is_err());

        assert_eq!(*engine.calls.borrow(), vec!["open", "finish", "free"]);
    }

    #[test]
    fn test_failed_open_stays_unopened() {
        let engine = ScriptedEngine {
            fail_open: true,
            ..Default::default()
        };
        let mut session = WriteSession::new();
        let result = session.open(&engine, Path::new("/plfs"), &conf(), None, None);

        assert!(matches!(result, Err(BenchError::Open { .. })));
        assert_eq!(session.state(), SessionState::Unopened);
        // The half-built handle has already been released
        assert_eq!(*engine.calls.borrow(), vec!["free"]);
    }

    #[test]
    fn test_pool_and_env_attached_before_open() {
        let engine = ScriptedEngine::default();
        let pool = Arc::new(ThreadPool::new(1).unwrap());
        let env: Arc<dyn Env> = Arc::new(crate::plfsdir::LocalEnv);

        let mut session = WriteSession::new();
        session
            .open(&engine, Path::new("/plfs"), &conf(), Some(pool), Some(env))
            .unwrap();
        assert!(session.has_thread_pool());
        assert!(session.has_env());

        assert_eq!(*engine.calls.borrow(), vec!["pool", "env", "open"]);
    }

    #[test]
    fn test_flushed_epoch_is_closed() {
        let engine = ScriptedEngine::default();
        let mut session = open_session(&engine);

        session.append("a", 0, b"").unwrap();
        session.epoch_flush(0).unwrap();
        assert_eq!(session.last_flushed(), Some(0));

        assert!(session.append("b", 0, b"").is_err());
        assert!(session.epoch_flush(0).is_err());

        session.append("b", 1, b"").unwrap();
        // Records of epoch 2 cannot be flushed as part of epoch 1
        session.append("c", 2, b"").unwrap();
        assert!(session.epoch_flush(1).is_err());
        session.epoch_flush(2).unwrap();
    }

    #[test]
    fn test_flush_error_is_wrapped() {
        let engine = ScriptedEngine {
            fail_flush: true,
            ..Default::default()
        };
        let mut session = open_session(&engine);
        session.append("a", 0, b"").unwrap();

        let err = session.epoch_flush(0).unwrap_err();
        assert!(matches!(err, BenchError::Flush { epoch: 0, .. }));
        assert_eq!(session.last_flushed(), None);
    }

    #[test]
    fn test_drop_while_open_skips_finish() {
        let engine = ScriptedEngine::default();
        {
            let mut session = open_session(&engine);
            session.append("a", 0, b"").unwrap();
        }
        assert_eq!(*engine.calls.borrow(), vec!["open", "append a 0", "free"]);
    }

    #[test]
    fn test_log_dir_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plfs");

        let mut session: WriteSession<LogDirHandle> = WriteSession::new();
        session
            .open(&LogDirEngine, &path, &conf(), None, None)
            .unwrap();
        assert_eq!(session.path(), Some(path.as_path()));

        session.append("f00000000-r00000000", 0, b"....").unwrap();
        session.epoch_flush(0).unwrap();
        session.finish().unwrap();

        assert!(path.join("L-00000000.idx").exists());
    }

    #[test]
    fn test_log_dir_open_error() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the directory should go
        let path = temp_dir.path().join("blocker");
        std::fs::write(&path, b"x").unwrap();

        let mut session: WriteSession<LogDirHandle> = WriteSession::new();
        let result = session.open(&LogDirEngine, &path, &conf(), None, None);
        assert!(matches!(result, Err(BenchError::Open { .. })));
        assert_eq!(session.state(), SessionState::Unopened);
    }
}

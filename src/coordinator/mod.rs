//! Process group coordination
//!
//! The driver only needs rank discovery, a barrier and teardown from the
//! collective runtime. [`SoloCoordinator`] is a group of one,
//! [`LocalGroup`] runs several ranks as threads of one process, and
//! `MpiCoordinator` (feature `mpi`) is the real multi-process runtime.

#[cfg(feature = "mpi")]
pub mod mpi;

#[cfg(feature = "mpi")]
pub use self::mpi::MpiCoordinator;

use std::sync::{Arc, Barrier};

use crate::error::BenchResult;

/// Collective operations consumed by the benchmark
pub trait Coordinator {
    fn rank(&self) -> u32;

    fn size(&self) -> u32;

    /// Block until every rank of the group has entered the barrier
    fn barrier(&self) -> BenchResult<()>;

    /// Tear down the process group
    fn finalize(self)
    where
        Self: Sized;
}

/// Single-rank group
#[derive(Debug, Default, Clone, Copy)]
pub struct SoloCoordinator;

impl Coordinator for SoloCoordinator {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn barrier(&self) -> BenchResult<()> {
        Ok(())
    }

    fn finalize(self) {}
}

/// In-process group whose ranks run on separate threads
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: u32,
    size: u32,
    barrier: Arc<Barrier>,
}

impl LocalGroup {
    /// Create one member per rank; hand each to its own thread
    pub fn create(size: u32) -> Vec<LocalGroup> {
        let barrier = Arc::new(Barrier::new(size as usize));
        (0..size)
            .map(|rank| LocalGroup {
                rank,
                size,
                barrier: barrier.clone(),
            })
            .collect()
    }
}

impl Coordinator for LocalGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn barrier(&self) -> BenchResult<()> {
        self.barrier.wait();
        Ok(())
    }

    fn finalize(self) {}
}

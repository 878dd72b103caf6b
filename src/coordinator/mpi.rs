//! MPI-backed coordinator
//!
//! Usage:
//!   mpirun -n <ranks> plfsdir_runner [options] <plfsdir>

use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use super::Coordinator;
use crate::error::{BenchError, BenchResult};

/// `MPI_COMM_WORLD` based coordinator
///
/// Dropping it (or calling `finalize`) finalizes MPI.
pub struct MpiCoordinator {
    world: SimpleCommunicator,
    rank: u32,
    size: u32,
    // Must be dropped last: finalizes MPI
    _universe: Universe,
}

impl MpiCoordinator {
    /// Initialize MPI and look up this process' rank
    pub fn init() -> BenchResult<Self> {
        let universe = mpi::initialize()
            .ok_or_else(|| BenchError::Coordination("fail to init mpi".to_string()))?;
        let world = universe.world();

        let rank = u32::try_from(world.rank())
            .map_err(|_| BenchError::Coordination("cannot get proc mpi rank".to_string()))?;
        let size = u32::try_from(world.size())
            .map_err(|_| BenchError::Coordination("cannot get mpi world size".to_string()))?;

        Ok(Self {
            world,
            rank,
            size,
            _universe: universe,
        })
    }
}

impl Coordinator for MpiCoordinator {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn barrier(&self) -> BenchResult<()> {
        // rsmpi aborts the job on a failed collective instead of returning
        self.world.barrier();
        Ok(())
    }

    fn finalize(self) {
        tracing::debug!("rank {}: finalizing mpi", self.rank);
        drop(self);
    }
}

/*!
 * Restore pipeline
 *
 * INIT -> ENUMERATE -> RESOLVE_ROUTES -> PARTITION -> TRANSFER -> FINALIZE.
 * An empty snapshot or an empty route table ends the run early with a
 * successful outcome. A termination signal stops the run at the next phase
 * or subprocess boundary. Scratch space is released on every exit from INIT.
 */

use std::collections::HashMap;
use std::time::Instant;

use tracing::{info, info_span};

use super::dispatch::{dispatch, DispatchMode, TransferTask};
use super::finalize::{finalize_routes, FINALIZE_DIR};
use super::interrupt::Interrupt;
use super::partition::Partition;
use super::routes::resolve_routes;
use super::scratch::ScratchSpace;
use super::snapshot::enumerate_snapshot;
use crate::config::RestoreConfig;
use crate::error::{Phase, Result};
use crate::stats::{RestoreOutcome, RestoreStats};
use crate::system::{select_topology, Capabilities, Topology};

/// Drives one restore run against a fixed configuration
pub struct Restorer {
    config: RestoreConfig,
    topology: Box<dyn Topology>,
    caps: Capabilities,
    interrupt: Interrupt,
}

impl Restorer {
    pub fn new(config: RestoreConfig, topology: Box<dyn Topology>, caps: Capabilities) -> Self {
        Self {
            config,
            topology,
            caps,
            interrupt: Interrupt::new(),
        }
    }

    /// Stop at the next step once `interrupt` is set
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Validate the configuration and pick the topology it names
    pub fn from_config(config: RestoreConfig, caps: Capabilities) -> Result<Self> {
        config.validate()?;
        let topology = select_topology(&config)?;
        Ok(Self::new(config, topology, caps))
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RestoreOutcome> {
        let start = Instant::now();
        let scratch = ScratchSpace::acquire(self.caps.scratch.clone())?;
        let mut outcome = self.run_phases(&scratch)?;

        if let RestoreOutcome::Restored(stats) = &mut outcome {
            stats.duration_ms = start.elapsed().as_millis() as u64;
        }
        Ok(outcome)
    }

    fn run_phases(&self, scratch: &ScratchSpace) -> Result<RestoreOutcome> {
        self.interrupt.check(Phase::Enumerate)?;
        let paths = {
            let _span = info_span!("enumerate").entered();
            enumerate_snapshot(&self.config)?
        };
        if paths.is_empty() {
            info!("Snapshot {} has no pages content", self.config.snapshot);
            return Ok(RestoreOutcome::NothingToRestore);
        }
        info!("Found {} pages content paths", paths.len());
        self.interrupt.check(Phase::Resolve)?;

        let routes = {
            let _span = info_span!("resolve_routes").entered();
            resolve_routes(self.caps.oracle.as_ref(), &paths, scratch)?
        };
        if routes.is_empty() {
            info!("Route oracle returned no routes");
            return Ok(RestoreOutcome::NoRoutes);
        }

        let partition = Partition::from_routes(&routes);
        if partition.is_empty() {
            info!("No routes found for {} paths", routes.len());
            return Ok(RestoreOutcome::NoRoutes);
        }
        let files: HashMap<_, _> = partition
            .write_files(scratch.local_dir())?
            .into_iter()
            .collect();
        info!(
            "Partitioned {} routes across {} nodes",
            routes.len(),
            partition.node_count()
        );

        let targets = self.topology.discover_targets(&partition);
        let transport = self
            .topology
            .transport_config(&targets, scratch.local_dir())?;

        let tasks: Vec<TransferTask> = targets
            .into_iter()
            .filter_map(|target| {
                let files_from = files.get(&target.node)?.clone();
                Some(TransferTask {
                    paths: partition.paths_for(&target.node).len(),
                    target,
                    files_from,
                    source: self.config.pages_dir(),
                    destination: self.config.remote_pages_dir(),
                    transport: transport.clone(),
                })
            })
            .collect();

        let mode = if self.config.parallel_transfers {
            DispatchMode::Parallel
        } else {
            DispatchMode::Sequential
        };
        let transfers = {
            let _span = info_span!("transfer", nodes = tasks.len()).entered();
            dispatch(&tasks, self.caps.transferrer.as_ref(), mode, &self.interrupt)?
        };

        let finalize_chunks = if self.topology.is_cluster() {
            self.interrupt.check(Phase::Finalize)?;
            let _span = info_span!("finalize").entered();
            finalize_routes(
                &routes,
                self.caps.finalizer.as_ref(),
                &scratch.local_path(FINALIZE_DIR),
                self.config.finalize_chunk_size,
                self.config.finalize_jobs,
                &self.interrupt,
            )?
        } else {
            0
        };

        Ok(RestoreOutcome::Restored(RestoreStats {
            paths_enumerated: paths.len(),
            routes_received: routes.len(),
            routes_unplaced: routes.unrouted(),
            transfers,
            finalize_chunks,
            duration_ms: 0,
        }))
    }
}

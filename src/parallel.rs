//! Worker pool configuration and ordered dispatch
//!
//! Each reduction runs on its own Rayon thread pool sized by [`ParallelConfig`].
//! Work items are mapped through an indexed parallel iterator, so results come
//! back in submission order no matter which worker finishes first. A failing
//! item fails the whole call; a panicking worker is reported as a broken pool.
//!
//! Workers are threads of one process. The netCDF/HDF5 library is not
//! thread-safe, and the `netcdf` crate holds one process-wide lock around
//! every library call, so slab reads and chunk decompression run one at a
//! time. Only the in-memory reductions and centroid math scale with the
//! worker count. Raising the work-item count bounds per-worker memory; it
//! does not speed up I/O.

use crate::errors::{ReduceError, Result};
use crate::partition::{IndexRange, WorkUnit};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub num_threads: Option<usize>,
    pub show_progress: bool,
}

impl ParallelConfig {
    /// Create a new parallel configuration
    pub fn new(num_threads: Option<usize>) -> Self {
        Self {
            num_threads,
            show_progress: true,
        }
    }

    /// Create a configuration that uses a specific number of threads
    pub fn with_threads(num_threads: usize) -> Self {
        Self::new(Some(num_threads))
    }

    /// Number of workers actually started; defaults to the logical CPU count
    pub fn resolved_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Anything that can be handed to a worker as one unit of work
pub trait WorkItem: Send + Sync {
    fn unit(&self) -> WorkUnit;
}

impl WorkItem for usize {
    fn unit(&self) -> WorkUnit {
        WorkUnit::Index(*self)
    }
}

impl WorkItem for IndexRange {
    fn unit(&self) -> WorkUnit {
        WorkUnit::Range(*self)
    }
}

/// A fixed-size pool of workers
pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
    show_progress: bool,
}

impl WorkerPool {
    pub fn new(config: &ParallelConfig) -> Result<Self> {
        let threads = config.resolved_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sxdm-reduce-{}", i))
            .build()
            .map_err(|e| {
                ReduceError::ThreadPoolError(format!(
                    "Failed to initialize worker pool with {} threads: {}",
                    threads, e
                ))
            })?;
        log::debug!("started worker pool with {} threads", threads);
        Ok(Self {
            pool,
            threads,
            show_progress: config.show_progress,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `task` once per item and return the results in item order.
    ///
    /// `job` carries the read-only context shared by all items.
    pub fn run<J, W, P, F>(&self, label: &str, job: &J, items: &[W], task: F) -> Result<Vec<P>>
    where
        J: Sync,
        W: WorkItem,
        P: Send,
        F: Fn(&J, &W) -> Result<P> + Sync,
    {
        log::info!(
            "⚡ {}: {} work items across {} workers",
            label,
            items.len(),
            self.threads
        );
        let progress = self.progress_bar(label, items.len());

        let results = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(job, item)));
                    progress.inc(1);
                    match outcome {
                        Ok(Ok(partial)) => Ok(partial),
                        Ok(Err(source)) => Err(ReduceError::Worker {
                            unit: item.unit(),
                            source: Box::new(source),
                        }),
                        Err(payload) => Err(ReduceError::PoolBroken {
                            unit: item.unit(),
                            message: panic_message(payload.as_ref()),
                        }),
                    }
                })
                .collect::<Result<Vec<P>>>()
        });

        match &results {
            Ok(_) => progress.finish_and_clear(),
            Err(e) => {
                progress.abandon();
                log::warn!("{} failed: {}", label, e);
            }
        }
        results
    }

    fn progress_bar(&self, label: &str, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(label.to_string());
        bar
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Get information about the current parallel configuration
pub fn parallel_info() -> ParallelInfo {
    ParallelInfo {
        current_threads: rayon::current_num_threads(),
        available_cores: num_cpus::get(),
        available_parallelism: std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1),
    }
}

/// Information about the parallel processing environment
#[derive(Debug, Clone)]
pub struct ParallelInfo {
    pub current_threads: usize,
    pub available_cores: usize,
    pub available_parallelism: usize,
}

use crate::types::{MaskError, MaskResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

/// Upper bound on concurrent masking tasks
pub const MAX_WORKERS: usize = 8;

/// Outcome of one masking task
pub type TaskResult = MaskResult<PathBuf>;

/// Runs independent, index-addressed tasks
///
/// Results come back in task index order whatever the completion order.
/// A failing or panicking task never stops its siblings.
pub trait Executor: Send + Sync {
    fn execute(&self, tasks: usize, task: &(dyn Fn(usize) -> TaskResult + Sync)) -> Vec<TaskResult>;

    /// Number of tasks that may run at once
    fn workers(&self) -> usize;
}

/// Runs tasks one after another on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn execute(
        &self,
        tasks: usize,
        task: &(dyn Fn(usize) -> TaskResult + Sync),
    ) -> Vec<TaskResult> {
        (0..tasks).map(|index| run_isolated(index, task)).collect()
    }

    fn workers(&self) -> usize {
        1
    }
}

/// Runs tasks on a dedicated, bounded rayon pool
#[derive(Debug, Clone, Copy)]
pub struct PoolExecutor {
    workers: usize,
}

impl PoolExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Pool sized for `tasks` inputs on this machine
    pub fn for_tasks(tasks: usize) -> Self {
        Self::new(worker_count(tasks, num_cpus::get()))
    }
}

impl Executor for PoolExecutor {
    #[cfg(feature = "parallel")]
    fn execute(
        &self,
        tasks: usize,
        task: &(dyn Fn(usize) -> TaskResult + Sync),
    ) -> Vec<TaskResult> {
        use rayon::prelude::*;

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("scenemask-worker-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("Could not start worker pool ({}), running sequentially", e);
                return SequentialExecutor.execute(tasks, task);
            }
        };

        log::debug!("Running {} task(s) on {} worker(s)", tasks, self.workers);
        pool.install(|| {
            (0..tasks)
                .into_par_iter()
                .map(|index| run_isolated(index, task))
                .collect()
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn execute(
        &self,
        tasks: usize,
        task: &(dyn Fn(usize) -> TaskResult + Sync),
    ) -> Vec<TaskResult> {
        log::warn!("Built without the `parallel` feature, running sequentially");
        SequentialExecutor.execute(tasks, task)
    }

    fn workers(&self) -> usize {
        self.workers
    }
}

/// Workers for `tasks` inputs: one core is left free, never more than
/// one per input or [`MAX_WORKERS`], and at least one
pub fn worker_count(tasks: usize, cores: usize) -> usize {
    cores
        .saturating_sub(1)
        .min(tasks)
        .min(MAX_WORKERS)
        .max(1)
}

/// Executor for a batch of `tasks` inputs
pub fn executor_for(parallel: bool, tasks: usize) -> Box<dyn Executor> {
    if parallel {
        Box::new(PoolExecutor::for_tasks(tasks))
    } else {
        Box::new(SequentialExecutor)
    }
}

fn run_isolated(index: usize, task: &(dyn Fn(usize) -> TaskResult + Sync)) -> TaskResult {
    catch_unwind(AssertUnwindSafe(|| task(index))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::error!("Task {} panicked: {}", index, message);
        Err(MaskError::Processing(format!("task {} panicked: {}", index, message)))
    })
}

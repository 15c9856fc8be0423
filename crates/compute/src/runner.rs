use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rayon::ThreadPool;

/// A unit of work that processes one partition of the node space.
///
/// Tasks are stateful and are handed back to the caller after a run, so they
/// can carry per-partition results (e.g. whether anything changed) and be
/// reused in the next iteration without re-allocation.
pub trait Task: Send {
    /// Processes the task's partition.
    ///
    /// Implementations are expected to poll `termination_flag` at least once
    /// per node and return early once it is raised.
    fn run(&mut self, termination_flag: &TerminationFlag);
}

/// A cheap-to-clone poll that tells running computations whether to continue.
#[derive(Clone)]
pub struct TerminationFlag(Arc<dyn Fn() -> bool + Send + Sync>);

impl TerminationFlag {
    /// A flag that is never raised.
    pub fn running_true() -> Self {
        Self(Arc::new(|| true))
    }

    /// A flag backed by a function that returns `true` as long as the
    /// computation should continue.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    /// use graph_compute::prelude::*;
    ///
    /// let deadline = Instant::now() + Duration::from_secs(60);
    /// let flag = TerminationFlag::from_fn(move || Instant::now() < deadline);
    /// assert!(flag.running());
    /// ```
    pub fn from_fn<F>(running: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(running))
    }

    /// A flag that is raised as soon as `terminate` is set to `true`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
    /// use graph_compute::prelude::*;
    ///
    /// let terminate = Arc::new(AtomicBool::new(false));
    /// let flag = TerminationFlag::from_atomic(Arc::clone(&terminate));
    /// assert!(flag.running());
    ///
    /// terminate.store(true, Ordering::SeqCst);
    /// assert!(flag.terminated());
    /// ```
    pub fn from_atomic(terminate: Arc<AtomicBool>) -> Self {
        Self(Arc::new(move || !terminate.load(Ordering::Relaxed)))
    }

    pub fn running(&self) -> bool {
        (self.0)()
    }

    pub fn terminated(&self) -> bool {
        !self.running()
    }
}

impl Default for TerminationFlag {
    fn default() -> Self {
        Self::running_true()
    }
}

impl Debug for TerminationFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TerminationFlag")
            .field(&self.running())
            .finish()
    }
}

/// Reports how a call to [`run_with_concurrency`] ended.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Terminated,
}

impl RunStatus {
    pub fn is_terminated(&self) -> bool {
        *self == RunStatus::Terminated
    }
}

/// Runs every task in `tasks` on `pool` with at most `concurrency` tasks in
/// flight at the same time and blocks until all of them have finished.
///
/// Tasks are dealt round-robin to `concurrency` workers, so no lock guards
/// the dispatch. Workers check `termination_flag` before picking up the next
/// task. Once the flag is raised, unstarted tasks are skipped and running
/// tasks are expected to return at their next check. The tasks stay owned by
/// the caller and keep whatever state they accumulated.
pub fn run_with_concurrency<T: Task>(
    pool: &ThreadPool,
    concurrency: usize,
    tasks: &mut [T],
    termination_flag: &TerminationFlag,
) -> RunStatus {
    if termination_flag.terminated() {
        return RunStatus::Terminated;
    }

    let workers = usize::min(usize::max(concurrency, 1), tasks.len());
    let mut queues = (0..workers).map(|_| Vec::new()).collect::<Vec<_>>();
    for (index, task) in tasks.iter_mut().enumerate() {
        queues[index % workers].push(task);
    }

    pool.scope(|s| {
        for queue in queues {
            s.spawn(move |_| {
                for task in queue {
                    if termination_flag.terminated() {
                        break;
                    }
                    task.run(termination_flag);
                }
            });
        }
    });

    if termination_flag.terminated() {
        RunStatus::Terminated
    } else {
        RunStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use rayon::ThreadPoolBuilder;

    use super::*;

    struct CountingTask<'a> {
        runs: usize,
        in_flight: &'a AtomicUsize,
        max_in_flight: &'a AtomicUsize,
    }

    impl Task for CountingTask<'_> {
        fn run(&mut self, _: &TerminationFlag) {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.runs += 1;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn runs_every_task_and_keeps_state() {
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);

        let mut tasks = (0..16)
            .map(|_| CountingTask {
                runs: 0,
                in_flight: &in_flight,
                max_in_flight: &max_in_flight,
            })
            .collect::<Vec<_>>();

        for _ in 0..2 {
            let status = run_with_concurrency(
                &pool,
                2,
                &mut tasks,
                &TerminationFlag::running_true(),
            );
            assert_eq!(status, RunStatus::Completed);
        }

        assert!(tasks.iter().all(|task| task.runs == 2));
        assert!(max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn more_workers_than_tasks() {
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);

        let mut tasks = (0..3)
            .map(|_| CountingTask {
                runs: 0,
                in_flight: &in_flight,
                max_in_flight: &max_in_flight,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(&pool, 8, &mut tasks, &TerminationFlag::running_true());

        assert_eq!(status, RunStatus::Completed);
        assert!(tasks.iter().all(|task| task.runs == 1));
        assert!(max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn empty_task_list() {
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let mut tasks: Vec<CountingTask> = Vec::new();

        let status = run_with_concurrency(&pool, 4, &mut tasks, &TerminationFlag::default());
        assert_eq!(status, RunStatus::Completed);
    }

    #[test]
    fn terminated_before_start() {
        let pool = ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);

        let mut tasks = (0..4)
            .map(|_| CountingTask {
                runs: 0,
                in_flight: &in_flight,
                max_in_flight: &max_in_flight,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(&pool, 2, &mut tasks, &TerminationFlag::from_fn(|| false));

        assert!(status.is_terminated());
        assert!(tasks.iter().all(|task| task.runs == 0));
    }

    struct TerminatingTask {
        terminate: Arc<AtomicBool>,
        ran: bool,
    }

    impl Task for TerminatingTask {
        fn run(&mut self, termination_flag: &TerminationFlag) {
            if termination_flag.running() {
                self.ran = true;
                self.terminate.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn skips_tasks_after_termination() {
        let pool = ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let terminate = Arc::new(AtomicBool::new(false));
        let flag = TerminationFlag::from_atomic(Arc::clone(&terminate));

        let mut tasks = (0..8)
            .map(|_| TerminatingTask {
                terminate: Arc::clone(&terminate),
                ran: false,
            })
            .collect::<Vec<_>>();

        let status = run_with_concurrency(&pool, 1, &mut tasks, &flag);

        assert_eq!(status, RunStatus::Terminated);
        assert_eq!(tasks.iter().filter(|task| task.ran).count(), 1);
    }
}

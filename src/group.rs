//! The coordinator: registration, dispatch, and ordered flushing.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::config::{Config, GroupBuilder};
use crate::pipeline::{GroupSinks, WorkerSink};
use crate::runner::{RunFn, Runner};

/// Group life-cycle. Strictly forward-moving; every public operation asserts
/// the state it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupState {
    Adding,
    Running,
    Waiting,
    Done,
}

/// One unit of work handed to the pool: the worker closure plus its sinks,
/// keyed by the runner id it reports back on completion.
struct Job {
    id: usize,
    func: RunFn,
    stdout: WorkerSink,
    stderr: WorkerSink,
}

/// Coordinates a batch of workers so their combined stdout and stderr read
/// as if the workers had run one after another.
///
/// The calling sequence is strict: any number of [`add`](Group::add) calls,
/// one [`run`](Group::run), one [`wait`](Group::wait), then discard the
/// group. Deviating panics, because the internal invariants rely on
/// single-use semantics. A group must only be driven from one thread; the
/// workers themselves are where the concurrency lives.
///
/// ```no_run
/// use std::io::Write;
/// use parout::Group;
///
/// let mut group = Group::builder().limit_active_runners(8).build().unwrap();
/// for arg in std::env::args().skip(1) {
///     group.add("", "", move |stdout, _stderr| {
///         let _ = writeln!(stdout, "processing {arg}");
///     });
/// }
/// group.run();
/// group.wait();
/// ```
///
/// A worker that never returns leaves `wait` blocked forever; there are no
/// timeouts and no cancellation.
pub struct Group {
    state: GroupState,
    config: Config,
    /// Shared with every tail stage; the one lock every output byte crosses.
    sinks: Arc<Mutex<GroupSinks>>,
    /// Insertion order; the id of a runner is its position at add time.
    runners: VecDeque<Runner>,
    completed_tx: Sender<usize>,
    completed_rx: Receiver<usize>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("runner_count", &self.runners.len())
            .finish()
    }
}

impl Group {
    /// A group with the serial-appearance defaults, writing to the process
    /// streams. Equivalent to `Group::builder().build().unwrap()`.
    #[must_use]
    pub fn new() -> Self {
        GroupBuilder::new().build().expect("default configuration is conflict-free")
    }

    /// Start configuring a group. See [`GroupBuilder`] for the option set.
    #[must_use]
    pub fn builder() -> GroupBuilder {
        GroupBuilder::new()
    }

    pub(crate) fn from_parts(config: Config, sinks: GroupSinks) -> Self {
        // Rendezvous channel: a pool thread's slot stays occupied until
        // wait() acknowledges the completion, matching the definition of an
        // "active" runner.
        let (completed_tx, completed_rx) = bounded(0);
        Self {
            state: GroupState::Adding,
            config,
            sinks: Arc::new(Mutex::new(sinks)),
            runners: VecDeque::new(),
            completed_tx,
            completed_rx,
        }
    }

    /// Register a worker. `out_tag`/`err_tag` are prepended to every line the
    /// worker emits on the corresponding sink; empty disables tagging for
    /// that side. Insertion order is the output order when
    /// [`order_runners`](GroupBuilder::order_runners) is set.
    ///
    /// The worker must write only to the two sinks it is given, never to the
    /// process streams, and must not return while helper threads it spawned
    /// are still writing.
    ///
    /// # Panics
    ///
    /// Panics if called after [`run`](Group::run).
    pub fn add<F>(&mut self, out_tag: impl AsRef<[u8]>, err_tag: impl AsRef<[u8]>, func: F)
    where
        F: FnOnce(&mut dyn Write, &mut dyn Write) + Send + 'static,
    {
        self.check_state(GroupState::Adding, "add");
        let id = self.runners.len();
        self.runners.push_back(Runner::new(id, out_tag.as_ref(), err_tag.as_ref(), Box::new(func)));
    }

    /// Build every pipeline, then start the workers and return immediately.
    /// At most [`limit_active_runners`](GroupBuilder::limit_active_runners)
    /// workers run at once; the rest are fed in as slots free up.
    ///
    /// # Panics
    ///
    /// Panics unless exactly in the post-`add` state.
    pub fn run(&mut self) {
        self.check_state(GroupState::Adding, "run");
        self.state = GroupState::Running;
        self.build_pipelines();
        self.start_runners();
    }

    /// Every pipeline is fully built before any worker starts. With ordered
    /// output the front runner is promoted immediately so its writes reach
    /// the sinks live, which is what gives a running command its sense of
    /// liveliness.
    fn build_pipelines(&mut self) {
        let config = &self.config;
        let sinks = &self.sinks;
        let mut first = true;
        for runner in self.runners.iter_mut() {
            if config.passthru {
                runner.build_passthru_pipeline(sinks);
            } else {
                runner.build_queued_pipeline(config, sinks);
                if first && config.foreground_allowed() {
                    runner.switch_to_foreground();
                }
            }
            first = false;
        }
    }

    fn start_runners(&mut self) {
        let total = self.runners.len();
        let pool = if self.config.limit_runners > 0 { self.config.limit_runners } else { total };
        debug!("dispatching {total} runner(s) across {pool} worker thread(s)");

        let (todo_tx, todo_rx) = bounded::<Job>(0);
        for _ in 0..pool {
            let todo = todo_rx.clone();
            let completed = self.completed_tx.clone();
            thread::spawn(move || {
                for job in todo.iter() {
                    let Job { id, func, mut stdout, mut stderr } = job;
                    trace!("runner {id} starting");
                    func(&mut stdout, &mut stderr);
                    // Send failure means the group was dropped without wait();
                    // there is nobody left to tell.
                    let _ = completed.send(id);
                }
            });
        }

        // Taking the closures now lets the feeder thread run without touching
        // the group, which stays on the caller's thread.
        let mut jobs = Vec::with_capacity(total);
        for runner in self.runners.iter_mut() {
            let func = runner.func.take().expect("runner dispatched exactly once");
            let (stdout, stderr) = runner.worker_sinks();
            jobs.push(Job { id: runner.id, func, stdout, stderr });
        }

        thread::spawn(move || {
            for job in jobs {
                if todo_tx.send(job).is_err() {
                    break;
                }
            }
            // Dropping todo_tx here retires the pool threads.
        });
    }

    /// Block until every worker has returned and every buffered byte has
    /// been delivered, flushing runners in the configured order and promoting
    /// the new front runner to foreground as the line-up advances.
    ///
    /// # Panics
    ///
    /// Panics unless called exactly once, after [`run`](Group::run).
    pub fn wait(&mut self) {
        self.check_state(GroupState::Running, "wait");
        self.state = GroupState::Waiting;

        while !self.runners.is_empty() {
            let id = self.completed_rx.recv().expect("group holds a completion sender");
            trace!("runner {id} completed");

            if let Some(runner) = self.runners.iter_mut().find(|r| r.id == id) {
                runner.can_close = true;
            }

            if self.config.order_runners {
                // Runners can finish in any order; only the contiguous
                // completed prefix may flush, the rest hold until their turn.
                self.flush_completed_prefix();
            } else {
                self.flush_runner(id);
            }

            if self.config.foreground_allowed() {
                if let Some(front) = self.runners.front() {
                    front.switch_to_foreground();
                }
            }
        }

        self.state = GroupState::Done;
    }

    fn flush_completed_prefix(&mut self) {
        while self.runners.front().is_some_and(|r| r.can_close) {
            let runner = self.runners.pop_front().expect("front presence just checked");
            self.finish(runner);
        }
    }

    fn flush_runner(&mut self, id: usize) {
        let pos = self
            .runners
            .iter()
            .position(|r| r.id == id)
            .expect("completed runner is still registered");
        let runner = self.runners.remove(pos).expect("position is in range");
        self.finish(runner);
    }

    /// Close the runner's pipeline (delivering any buffered output) and, if
    /// it was not the last one, emit the configured separators.
    fn finish(&mut self, runner: Runner) {
        debug!("flushing runner {}", runner.id);
        runner.close();

        if !self.runners.is_empty() {
            let mut sinks = self.sinks.lock();
            sinks.write_separators(&self.config.out_sep, &self.config.err_sep);
        }
    }

    fn check_state(&self, expect: GroupState, op: &str) {
        assert!(
            self.state == expect,
            "parout::Group::{op} called out of sequence: group is {:?}, needs {:?}",
            self.state,
            expect,
        );
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

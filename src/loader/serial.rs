//! Serial background context: one named worker thread that owns the source.
//!
//! Architecture: the worker thread owns the [`Source`](crate::source::Source)
//! and executes [`LoadJob`]s strictly one at a time in submission order. Jobs
//! arrive over an unbounded crossbeam channel so submission never blocks the
//! foreground. Finished jobs hand their output to the foreground through a
//! second channel the foreground drains at its own pace.
//!
//! Delayed submissions are parked in a deadline-ordered queue inside the
//! worker and run once due, so a debounce never occupies the worker.
//!
//! Shutdown raises a stop flag shared with the worker before the sentinel is
//! queued. Jobs still queued behind the running one are discarded unrun, so
//! joining waits for at most one job.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::core::errors::{CacheError, Result};

/// A unit of work executed on the background context.
pub trait LoadJob<S>: Send + 'static {
    /// Value handed back to the foreground context.
    type Output: Send + 'static;

    /// Run against the source. `None` discards the job without a handoff.
    fn run(self, source: &mut S) -> Option<Self::Output>;
}

enum LoaderCommand<J> {
    Run(J),
    RunAt(Instant, J),
    Shutdown,
}

/// Submission side of a background context.
///
/// Cloneable and `Send`, so dirty observers can post from any thread.
pub struct LoaderHandle<J> {
    tx: Sender<LoaderCommand<J>>,
    pending: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
}

impl<J> Clone for LoaderHandle<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            stop: Arc::clone(&self.stop),
        }
    }
}

impl<J> LoaderHandle<J> {
    /// Queue `job` behind everything already submitted. Non-blocking.
    ///
    /// Fails with [`CacheError::ChannelClosed`] once shutdown has been
    /// requested.
    pub fn submit(&self, job: J) -> Result<()> {
        self.post(LoaderCommand::Run(job))
    }

    /// Queue `job` to run no earlier than `delay` from now.
    pub fn submit_after(&self, delay: Duration, job: J) -> Result<()> {
        self.post(LoaderCommand::RunAt(Instant::now() + delay, job))
    }

    /// Jobs submitted (immediate or delayed) that have not finished running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn post(&self, command: LoaderCommand<J>) -> Result<()> {
        if self.stop.load(Ordering::Acquire) {
            return Err(CacheError::ChannelClosed { component: "loader" });
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(command).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(CacheError::ChannelClosed { component: "loader" });
        }
        Ok(())
    }
}

/// Receiving side of a background context, before its worker is spawned.
pub struct LoaderInbox<J> {
    rx: Receiver<LoaderCommand<J>>,
}

/// Create the submission handle and inbox for a background context.
///
/// Split from [`SerialLoader::spawn`] so an observer holding the handle can be
/// registered with the source before the source moves onto the worker.
#[must_use]
pub fn loader_channel<J>() -> (LoaderHandle<J>, LoaderInbox<J>) {
    let (tx, rx) = unbounded();
    (
        LoaderHandle {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
        },
        LoaderInbox { rx },
    )
}

/// Owner of a running background context.
///
/// Dropping it requests shutdown and joins the worker; delayed jobs that
/// have not come due are discarded.
pub struct SerialLoader<J> {
    handle: LoaderHandle<J>,
    join: Option<thread::JoinHandle<()>>,
    name: String,
}

impl<J> SerialLoader<J> {
    /// Move `source` onto a new worker thread and start serving `inbox`.
    pub fn spawn<S>(
        name: &str,
        source: S,
        handle: LoaderHandle<J>,
        inbox: LoaderInbox<J>,
        output: Sender<J::Output>,
    ) -> Result<Self>
    where
        S: Send + 'static,
        J: LoadJob<S>,
    {
        let worker = Worker {
            pending: Arc::clone(&handle.pending),
            stop: Arc::clone(&handle.stop),
            output,
        };
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.serve(&inbox.rx, source))
            .map_err(|e| CacheError::Runtime {
                details: format!("failed to spawn loader thread {name}: {e}"),
            })?;

        tracing::debug!(target: "wcache::loader", thread = name, "loader started");
        Ok(Self {
            handle,
            join: Some(join),
            name: name.to_string(),
        })
    }

    pub fn submit(&self, job: J) -> Result<()> {
        self.handle.submit(job)
    }

    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// Stop the worker and wait for the job it is running to finish.
    ///
    /// Queued and delayed jobs are discarded without running.
    pub fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.handle.stop.store(true, Ordering::Release);
        let _ = self.handle.tx.send(LoaderCommand::Shutdown);
        if join.join().is_err() {
            tracing::warn!(target: "wcache::loader", thread = %self.name, "loader thread panicked");
        } else {
            tracing::debug!(target: "wcache::loader", thread = %self.name, "loader stopped");
        }
    }
}

impl<J> Drop for SerialLoader<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker-side state of a background context.
struct Worker<O> {
    pending: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    output: Sender<O>,
}

impl<O> Worker<O> {
    fn serve<S, J>(&self, rx: &Receiver<LoaderCommand<J>>, mut source: S)
    where
        J: LoadJob<S, Output = O>,
    {
        // Deadline-ordered; equal deadlines keep submission order.
        let mut delayed: VecDeque<(Instant, J)> = VecDeque::new();

        while !self.stopping() {
            let now = Instant::now();
            while delayed.front().is_some_and(|(at, _)| *at <= now) {
                if let Some((_, job)) = delayed.pop_front() {
                    self.run_job(job, &mut source);
                }
            }

            let received = match delayed.front() {
                Some((deadline, _)) => match rx.recv_deadline(*deadline) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match received {
                LoaderCommand::Run(job) => self.run_job(job, &mut source),
                LoaderCommand::RunAt(at, job) => {
                    let position = delayed.partition_point(|(deadline, _)| *deadline <= at);
                    delayed.insert(position, (at, job));
                }
                LoaderCommand::Shutdown => break,
            }
        }

        let discarded = delayed.len()
            + rx.try_iter()
                .filter(|command| !matches!(command, LoaderCommand::Shutdown))
                .count();
        if discarded > 0 {
            self.pending.fetch_sub(discarded, Ordering::AcqRel);
            tracing::debug!(target: "wcache::loader", discarded, "queued jobs dropped at shutdown");
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run_job<S, J>(&self, job: J, source: &mut S)
    where
        J: LoadJob<S, Output = O>,
    {
        if self.stopping() {
            drop(job);
        } else if let Some(result) = job.run(source)
            && self.output.send(result).is_err()
        {
            tracing::warn!(target: "wcache::loader", "foreground gone, handoff dropped");
        }
        // Decrement after the handoff is visible so "nothing pending and inbox
        // empty" is a sound idle test on the foreground.
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(usize);

    impl LoadJob<Vec<usize>> for Echo {
        type Output = usize;

        fn run(self, source: &mut Vec<usize>) -> Option<usize> {
            source.push(self.0);
            (self.0 % 2 == 0).then_some(self.0)
        }
    }

    /// Sleeps, then counts itself as run.
    struct Slow(Arc<AtomicUsize>);

    impl LoadJob<Vec<usize>> for Slow {
        type Output = usize;

        fn run(self, _source: &mut Vec<usize>) -> Option<usize> {
            thread::sleep(Duration::from_millis(50));
            Some(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn spawn_with<J: LoadJob<Vec<usize>>>(
        name: &str,
    ) -> (SerialLoader<J>, LoaderHandle<J>, Receiver<J::Output>) {
        let (handle, inbox) = loader_channel::<J>();
        let (out_tx, out_rx) = unbounded();
        let loader = SerialLoader::spawn(name, Vec::new(), handle.clone(), inbox, out_tx)
            .expect("spawn loader");
        (loader, handle, out_rx)
    }

    fn start() -> (SerialLoader<Echo>, Receiver<usize>) {
        let (loader, _handle, out) = spawn_with("test-loader");
        (loader, out)
    }

    fn wait_drained(loader: &SerialLoader<Echo>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while loader.pending() > 0 {
            assert!(Instant::now() < deadline, "loader never drained");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn jobs_run_in_submission_order() {
        let (loader, out) = start();
        for i in 0..10 {
            loader.submit(Echo(i * 2)).expect("submit");
        }
        wait_drained(&loader);
        let got: Vec<usize> = out.try_iter().collect();
        assert_eq!(got, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
    }

    #[test]
    fn discarded_jobs_produce_no_handoff() {
        let (loader, out) = start();
        loader.submit(Echo(1)).expect("submit");
        loader.submit(Echo(3)).expect("submit");
        loader.submit(Echo(4)).expect("submit");
        wait_drained(&loader);
        assert_eq!(out.try_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn delayed_job_runs_after_immediate_ones() {
        let (loader, handle, out) = spawn_with::<Echo>("test-loader");
        handle.submit_after(Duration::from_millis(30), Echo(100)).expect("submit");
        loader.submit(Echo(2)).expect("submit");
        assert_eq!(loader.pending(), 2);
        wait_drained(&loader);
        assert_eq!(out.try_iter().collect::<Vec<_>>(), vec![2, 100]);
    }

    #[test]
    fn delayed_jobs_with_equal_delay_keep_order() {
        let (loader, handle, out) = spawn_with::<Echo>("test-loader");
        let delay = Duration::from_millis(20);
        handle.submit_after(delay, Echo(6)).expect("submit");
        handle.submit_after(delay + Duration::from_millis(5), Echo(8)).expect("submit");
        wait_drained(&loader);
        assert_eq!(out.try_iter().collect::<Vec<_>>(), vec![6, 8]);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let (mut loader, handle, _out) = spawn_with::<Echo>("test-loader");
        loader.shutdown();
        assert!(matches!(
            handle.submit(Echo(2)),
            Err(CacheError::ChannelClosed { component: "loader" })
        ));
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn shutdown_waits_for_running_job_only() {
        let (mut loader, handle, out) = spawn_with::<Slow>("slow-loader");
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            handle.submit(Slow(Arc::clone(&runs))).expect("submit");
        }
        thread::sleep(Duration::from_millis(10));

        let started = Instant::now();
        loader.shutdown();
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(500), "shutdown took {elapsed:?}");
        assert!(runs.load(Ordering::SeqCst) <= 2);
        assert_eq!(out.try_iter().count(), runs.load(Ordering::SeqCst));
        assert_eq!(handle.pending(), 0, "discarded jobs are no longer pending");
    }

    #[test]
    fn shutdown_drops_delayed_jobs() {
        let (mut loader, handle, out) = spawn_with::<Echo>("test-loader");
        handle.submit_after(Duration::from_secs(60), Echo(2)).expect("submit");
        handle.submit_after(Duration::from_secs(60), Echo(4)).expect("submit");
        assert_eq!(handle.pending(), 2);
        loader.shutdown();
        assert_eq!(handle.pending(), 0);
        assert_eq!(out.try_iter().count(), 0);
    }
}

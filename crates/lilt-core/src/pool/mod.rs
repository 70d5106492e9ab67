//! CommandWorkerPool - background threads for composite commands
//!
//! Composite commands (find-or-load-then-play) can touch the disk, so they
//! run here instead of on the host's calling thread. Callers either fire and
//! forget ([`CommandWorkerPool::submit`]) or keep a [`TaskHandle`] and wait
//! for the result with a deadline.
//!
//! A panicking task is caught and logged; the worker carries on.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{EngineError, EngineResult, ErrorKind};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Workers {
    job_tx: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

pub struct CommandWorkerPool {
    name: String,
    threads: usize,
    workers: Mutex<Option<Workers>>,
}

impl CommandWorkerPool {
    pub fn new(name: impl Into<String>, threads: usize) -> Self {
        Self {
            name: name.into(),
            threads: threads.max(1),
            workers: Mutex::new(None),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_running(&self) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Spawn the worker threads; a no-op when already running
    pub fn start(&self) -> EngineResult<()> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.is_some() {
            return Ok(());
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(self.threads);
        for index in 0..self.threads {
            let job_rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.name, index))
                .spawn(move || worker_loop(job_rx))
                .map_err(|e| {
                    EngineError::new(
                        ErrorKind::NotInitialized,
                        format!("failed to spawn worker thread: {}", e),
                    )
                })?;
            handles.push(handle);
        }

        log::info!("CommandWorkerPool '{}' started ({} threads)", self.name, self.threads);
        *workers = Some(Workers { job_tx, handles });
        Ok(())
    }

    /// Queue a task without waiting for it
    pub fn submit<F>(&self, job: F) -> EngineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let workers = workers.as_ref().ok_or_else(|| {
            EngineError::new(ErrorKind::NotInitialized, "worker pool is not running")
        })?;
        workers
            .job_tx
            .send(Box::new(job))
            .map_err(|_| EngineError::new(ErrorKind::NotInitialized, "worker pool is shutting down"))
    }

    /// Queue a task and get a handle to its result
    pub fn submit_with_result<T, F>(&self, task: F) -> EngineResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> EngineResult<T> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        self.submit(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|panic| {
                Err(EngineError::new(ErrorKind::TaskFailed, panic_message(&*panic)))
            });
            // The caller may have timed out and gone away
            let _ = result_tx.send(result);
        })?;
        Ok(TaskHandle { result_rx })
    }

    /// Close the queue and join every worker; queued tasks still run
    pub fn stop(&self) {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Workers { job_tx, handles }) = workers else {
            return;
        };

        drop(job_tx);
        for handle in handles {
            if handle.join().is_err() {
                log::warn!("CommandWorkerPool '{}': worker exited abnormally", self.name);
            }
        }
        log::info!("CommandWorkerPool '{}' stopped", self.name);
    }
}

impl Drop for CommandWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(job_rx: Receiver<Job>) {
    while let Ok(job) = job_rx.recv() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            log::error!("worker task panicked: {}", panic_message(&*panic));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Pending result of a task submitted with
/// [`CommandWorkerPool::submit_with_result`]
pub struct TaskHandle<T> {
    result_rx: Receiver<EngineResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait up to `timeout`
    ///
    /// On [`ErrorKind::Timeout`] the task keeps running and its eventual
    /// outcome is unknown to the caller.
    pub fn wait_timeout(self, timeout: Duration) -> EngineResult<T> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EngineError::new(
                ErrorKind::Timeout,
                format!("no result after {} ms", timeout.as_millis()),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::new(
                ErrorKind::TaskFailed,
                "task dropped without a result",
            )),
        }
    }

    pub fn wait(self) -> EngineResult<T> {
        self.result_rx.recv().unwrap_or_else(|_| {
            Err(EngineError::new(
                ErrorKind::TaskFailed,
                "task dropped without a result",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn started(threads: usize) -> CommandWorkerPool {
        let pool = CommandWorkerPool::new("test-worker", threads);
        pool.start().unwrap();
        pool
    }

    #[test]
    fn test_result_round_trip() {
        let pool = started(2);
        let handle = pool.submit_with_result(|| Ok(21 * 2)).unwrap();
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_task_error_is_returned() {
        let pool = started(1);
        let handle = pool
            .submit_with_result::<(), _>(|| Err(EngineError::new(ErrorKind::FileNotFound, "x")))
            .unwrap();
        let err = handle.wait().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_slow_task_times_out() {
        let pool = started(1);
        let handle = pool
            .submit_with_result(|| {
                thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .unwrap();
        let err = handle.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_panic_reported_and_worker_survives() {
        let pool = started(1);
        let handle = pool
            .submit_with_result::<(), _>(|| panic!("boom"))
            .unwrap();
        let err = handle.wait().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskFailed);
        assert!(err.message().contains("boom"));

        let handle = pool.submit_with_result(|| Ok(7)).unwrap();
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn test_submit_before_start_fails() {
        let pool = CommandWorkerPool::new("idle", 1);
        let err = pool.submit(|| {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_stop_drains_queue() {
        let pool = started(2);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.stop();
        assert_eq!(done.load(Ordering::SeqCst), 16);
        assert!(!pool.is_running());

        // Restartable after stop
        pool.start().unwrap();
        assert!(pool.is_running());
    }
}

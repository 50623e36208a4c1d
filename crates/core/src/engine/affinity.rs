//! A dedicated worker thread for fixtures that need every pipe on one thread.
use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

/// Work marshalled onto a worker thread.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Starts `job` on a fresh thread named after the pipe. The thread is never
/// joined; the job reports back through its own channel.
pub(crate) fn spawn_detached(name: &str, job: Job) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("trellis-pipe {name}"))
        .spawn(job)
        .map(|_| ())
}

/// Runs submitted jobs one after another on a single thread, created once per
/// fixture and shut down after it.
pub(crate) struct AffinityWorker {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    abandoned: bool,
}

impl AffinityWorker {
    pub(crate) fn spawn(fixture: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(format!("trellis-affinity {fixture}"))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            })?;
        let thread_id = handle.thread().id();
        debug!(fixture, ?thread_id, "Started affinity worker");
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            thread_id,
            abandoned: false,
        })
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Queues `job` behind whatever the worker is running.
    pub(crate) fn submit(&self, job: Job) -> io::Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::other("affinity worker is shut down"))?;
        sender
            .send(job)
            .map_err(|_| io::Error::other("affinity worker has stopped"))
    }

    /// Marks the worker as stuck in a job that will not be waited for.
    /// Shutdown then detaches it instead of joining.
    pub(crate) fn abandon(&mut self) {
        self.abandoned = true;
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Closes the queue and joins the thread unless it was abandoned.
    pub(crate) async fn shutdown(mut self) {
        self.sender.take();
        let Some(handle) = self.handle.take() else {
            return;
        };
        let thread_id = self.thread_id();
        if self.is_abandoned() {
            warn!(?thread_id, "Detaching abandoned affinity worker");
            return;
        }
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => debug!(?thread_id, "Joined affinity worker"),
            Ok(Err(_)) => warn!(?thread_id, "Affinity worker panicked"),
            Err(err) => warn!(?thread_id, %err, "Failed to join affinity worker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_order_on_one_thread() {
        let worker = AffinityWorker::spawn("fixture").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            worker
                .submit(Box::new(move || {
                    seen.lock().unwrap().push((i, thread::current().id()));
                }))
                .unwrap();
        }
        let expected_thread = worker.thread_id();
        worker.shutdown().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(seen.iter().all(|(_, id)| *id == expected_thread));
        assert_ne!(expected_thread, thread::current().id());
    }

    #[tokio::test]
    async fn test_abandoned_worker_is_not_joined() {
        let mut worker = AffinityWorker::spawn("stuck").unwrap();
        let (release, wait) = mpsc::channel::<()>();
        worker
            .submit(Box::new(move || {
                let _ = wait.recv();
            }))
            .unwrap();
        worker.abandon();
        assert!(worker.is_abandoned());
        tokio::time::timeout(std::time::Duration::from_secs(1), worker.shutdown())
            .await
            .unwrap();
        drop(release);
    }
}

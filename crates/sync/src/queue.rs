//! Single-slot request queue drained by one worker thread.
//!
//! A long-lived process submits sync jobs here so that at most one runs at a
//! time and at most one waits. Anything beyond that is refused with
//! [`Submit::Busy`] instead of piling up.

use crate::adapters::panic_message;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submit {
    Accepted,
    Busy,
}

struct Slot<J> {
    pending: Option<J>,
    running: bool,
    closed: bool,
}

struct Shared<J> {
    slot: Mutex<Slot<J>>,
    changed: Condvar,
}

pub struct SyncQueue<J: Send + 'static> {
    shared: Arc<Shared<J>>,
    worker: Option<JoinHandle<()>>,
}

impl<J: Send + 'static> SyncQueue<J> {
    /// Starts the worker. `handler` runs every accepted job in order; a panic
    /// inside it is logged and the worker keeps serving.
    pub fn spawn<F>(mut handler: F) -> Self
    where
        F: FnMut(J) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                pending: None,
                running: false,
                closed: false,
            }),
            changed: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || loop {
            let job = {
                let mut slot = worker_shared.slot.lock();
                while slot.pending.is_none() && !slot.closed {
                    worker_shared.changed.wait(&mut slot);
                }
                match slot.pending.take() {
                    Some(job) => {
                        slot.running = true;
                        job
                    }
                    None => break,
                }
            };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(job))) {
                tracing::error!(error = %panic_message(payload.as_ref()), "sync job panicked");
            }
            worker_shared.slot.lock().running = false;
            worker_shared.changed.notify_all();
        });
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Queues `job` unless one is already running or waiting.
    pub fn submit(&self, job: J) -> Submit {
        let mut slot = self.shared.slot.lock();
        if slot.closed || slot.running || slot.pending.is_some() {
            return Submit::Busy;
        }
        slot.pending = Some(job);
        drop(slot);
        self.shared.changed.notify_all();
        Submit::Accepted
    }

    pub fn is_busy(&self) -> bool {
        let slot = self.shared.slot.lock();
        slot.running || slot.pending.is_some()
    }

    /// Blocks until no job is running or waiting.
    pub fn wait_idle(&self) {
        let mut slot = self.shared.slot.lock();
        while slot.running || slot.pending.is_some() {
            self.shared.changed.wait(&mut slot);
        }
    }
}

impl<J: Send + 'static> Drop for SyncQueue<J> {
    /// Lets a waiting job finish, then stops the worker.
    fn drop(&mut self) {
        self.shared.slot.lock().closed = true;
        self.shared.changed.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn busy_while_running_and_while_slot_is_full() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<u32>();
        let (done_tx, done_rx) = mpsc::channel::<u32>();
        let queue = SyncQueue::spawn(move |job: u32| {
            started_tx.send(job).unwrap();
            release_rx.recv().unwrap();
            done_tx.send(job).unwrap();
        });

        assert_eq!(queue.submit(1), Submit::Accepted);
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(queue.is_busy());
        assert_eq!(queue.submit(2), Submit::Busy);

        release_tx.send(()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        queue.wait_idle();
        assert!(!queue.is_busy());

        assert_eq!(queue.submit(3), Submit::Accepted);
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        release_tx.send(()).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    }

    #[test]
    fn worker_survives_a_panicking_job() {
        let (done_tx, done_rx) = mpsc::channel::<u32>();
        let queue = SyncQueue::spawn(move |job: u32| {
            if job == 0 {
                panic!("bad job");
            }
            done_tx.send(job).unwrap();
        });

        assert_eq!(queue.submit(0), Submit::Accepted);
        queue.wait_idle();
        assert_eq!(queue.submit(7), Submit::Accepted);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }
}

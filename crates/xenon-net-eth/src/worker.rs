//! Background ring worker.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

use crate::device::Shared;
use crate::ring::Ring;

/// Depth of the wake channel. Events only ever mean "look again", so a full channel loses
/// nothing.
const WAKE_CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    RingArmed(Ring),
    RxQueued,
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Worker {
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawns the worker and installs its wake channel in `shared`.
    pub fn spawn(shared: Arc<Shared>) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(WAKE_CHANNEL_DEPTH);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("eth-worker".to_string())
            .spawn(move || run(&thread_shared, &rx))?;
        *shared.wake.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        tracing::debug!("ethernet worker started");
        Ok(Self { handle })
    }

    /// Sends `Shutdown`, drops the wake channel and joins the thread.
    pub fn shutdown(self, shared: &Shared) {
        let tx = shared
            .wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            // Either outcome ends the worker: it sees the event or the disconnect.
            let _ = tx.try_send(WorkerEvent::Shutdown);
        }
        if self.handle.join().is_err() {
            tracing::error!("ethernet worker panicked");
        } else {
            tracing::debug!("ethernet worker stopped");
        }
    }
}

fn run(shared: &Shared, events: &Receiver<WorkerEvent>) {
    let interval = shared.config.wake_interval;
    loop {
        match events.recv_timeout(interval) {
            Ok(WorkerEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
        }

        // Collapse a burst of wake-ups into a single pass.
        loop {
            match events.try_recv() {
                Ok(WorkerEvent::Shutdown) | Err(TryRecvError::Disconnected) => return,
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
            }
        }

        if shared.has_pending_work() {
            shared.run_pass();
        }
    }
}

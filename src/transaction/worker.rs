//! Background worker running one transaction at a time.
//!
//! The interactive side submits [`Job`]s and receives [`WorkerEvent`]s.
//! A store is moved into its job and handed back in the finished event, so
//! nothing can edit it while a transaction is in flight.

use super::{LoadTransaction, RestoreTransaction, SaveTransaction, TransactionResult};
use crate::config::StoreConfig;
use crate::shell::CommandChannel;
use crate::store::PropertyStore;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Which transaction a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionKind {
    Load,
    Save,
    Restore,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Load => "load",
            TransactionKind::Save => "save",
            TransactionKind::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Work for the transaction thread.
#[derive(Debug)]
pub enum Job {
    /// Replace `store` with the content of `target`.
    Load {
        target: PathBuf,
        store: PropertyStore,
    },
    /// Write `store` to `destination`.
    Save {
        destination: PathBuf,
        store: PropertyStore,
    },
    /// Move the backup of `destination` back in place.
    Restore {
        destination: PathBuf,
        store: Option<PropertyStore>,
    },
}

impl Job {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Job::Load { .. } => TransactionKind::Load,
            Job::Save { .. } => TransactionKind::Save,
            Job::Restore { .. } => TransactionKind::Restore,
        }
    }
}

/// Identifier assigned to a job when it is submitted.
pub type JobId = u64;

/// Notification sent back to the submitting side.
#[derive(Debug)]
pub enum WorkerEvent {
    Started {
        id: JobId,
        kind: TransactionKind,
    },
    Finished {
        id: JobId,
        kind: TransactionKind,
        result: TransactionResult,
        /// The store the job carried, updated by the transaction.
        store: Option<PropertyStore>,
    },
}

impl WorkerEvent {
    /// The job this event belongs to.
    pub fn id(&self) -> JobId {
        match self {
            WorkerEvent::Started { id, .. } | WorkerEvent::Finished { id, .. } => *id,
        }
    }
}

/// Dedicated thread executing transactions in submission order.
pub struct TransactionWorker {
    jobs: Option<Sender<(JobId, Job)>>,
    events: Receiver<WorkerEvent>,
    /// Events of other jobs received while [`run`](Self::run) waited.
    backlog: Mutex<VecDeque<WorkerEvent>>,
    next_id: AtomicU64,
    handle: Option<JoinHandle<()>>,
}

impl TransactionWorker {
    /// Start the worker thread.
    pub fn spawn(channel: Arc<dyn CommandChannel>, config: StoreConfig) -> std::io::Result<Self> {
        let (jobs, job_rx) = mpsc::channel::<(JobId, Job)>();
        let (event_tx, events) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("transactions".to_string())
            .spawn(move || {
                for (id, job) in job_rx {
                    let kind = job.kind();
                    debug!("{} job {} started", kind, id);
                    // A vanished receiver only means nobody is listening.
                    let _ = event_tx.send(WorkerEvent::Started { id, kind });
                    let (result, store) = execute(channel.as_ref(), &config, job);
                    let _ = event_tx.send(WorkerEvent::Finished {
                        id,
                        kind,
                        result,
                        store,
                    });
                }
                debug!("transaction worker exiting");
            })?;

        Ok(Self {
            jobs: Some(jobs),
            events,
            backlog: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            handle: Some(handle),
        })
    }

    /// Queue a job. Returns its id, or `None` if the worker has stopped.
    pub fn submit(&self, job: Job) -> Option<JobId> {
        let jobs = self.jobs.as_ref()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        jobs.send((id, job)).ok()?;
        Some(id)
    }

    /// Wait for the next event of any job. `None` once the worker stopped
    /// and every event was consumed.
    pub fn next_event(&self) -> Option<WorkerEvent> {
        if let Some(event) = self.backlog.lock().pop_front() {
            return Some(event);
        }
        self.events.recv().ok()
    }

    /// Next event if one is ready, without blocking.
    pub fn try_next_event(&self) -> Option<WorkerEvent> {
        if let Some(event) = self.backlog.lock().pop_front() {
            return Some(event);
        }
        self.events.try_recv().ok()
    }

    /// Submit a job and block until it finishes.
    ///
    /// Events of jobs queued earlier with [`submit`](Self::submit) are kept
    /// for [`next_event`](Self::next_event). Returns `None` if the worker
    /// stopped before finishing the job.
    pub fn run(&self, job: Job) -> Option<(TransactionResult, Option<PropertyStore>)> {
        let id = self.submit(job)?;

        // Finished events already in the backlog belong to other jobs.
        for event in self.events.iter() {
            match event {
                WorkerEvent::Started { id: started, kind } if started == id => {
                    debug!("{} in progress", kind)
                }
                WorkerEvent::Finished {
                    id: finished,
                    result,
                    store,
                    ..
                } if finished == id => return Some((result, store)),
                other => self.backlog.lock().push_back(other),
            }
        }
        None
    }

    /// Stop accepting jobs, finish queued ones, and join the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("transaction worker panicked");
            }
        }
    }
}

impl Drop for TransactionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn execute(
    channel: &dyn CommandChannel,
    config: &StoreConfig,
    job: Job,
) -> (TransactionResult, Option<PropertyStore>) {
    match job {
        Job::Load { target, mut store } => {
            let result = LoadTransaction::new(channel, config, &target).run(&mut store);
            (result.into(), Some(store))
        }
        Job::Save {
            destination,
            mut store,
        } => {
            let result = SaveTransaction::new(channel, config, &destination).run(&mut store);
            (result.into(), Some(store))
        }
        Job::Restore {
            destination,
            mut store,
        } => {
            let result = RestoreTransaction::new(channel, config, &destination).run(store.as_mut());
            (result.into(), store)
        }
    }
}

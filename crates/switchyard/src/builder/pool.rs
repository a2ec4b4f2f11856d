// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-size worker pool for asynchronous writes and chained messages.
//!
//! Jobs go through a bounded crossbeam channel to `sy-worker-*` threads.
//! When the queue is full (or no worker could be started) the job runs on
//! the submitting thread, so a worker that submits never blocks on itself.
//! Workers exit once the pool is dropped and the queue is drained.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

/// Default number of dispatch workers per builder.
pub const DEFAULT_WORKERS: usize = 8;

/// Pending jobs before submitters run work inline.
pub const QUEUE_CAPACITY: usize = 1024;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    sender: Sender<Job>,
    workers: usize,
    inline_runs: AtomicU64,
}

impl WorkerPool {
    pub(crate) fn new(workers: usize) -> Self {
        let (sender, receiver) = channel::bounded::<Job>(QUEUE_CAPACITY);

        let mut started = 0;
        for index in 0..workers.max(1) {
            let rx = receiver.clone();
            match thread::Builder::new()
                .name(format!("sy-worker-{}", index))
                .spawn(move || worker_loop(rx))
            {
                Ok(_) => started += 1,
                Err(e) => tracing::warn!("Cannot start dispatch worker {}: {}", index, e),
            }
        }
        tracing::debug!(workers = started, "dispatch pool started");

        Self {
            sender,
            workers: started,
            inline_runs: AtomicU64::new(0),
        }
    }

    /// Worker threads actually running.
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Jobs that ran on the submitting thread.
    pub(crate) fn inline_runs(&self) -> u64 {
        self.inline_runs.load(Ordering::Relaxed)
    }

    /// Queue `job`, or run it here when the queue cannot take it.
    pub(crate) fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        if self.workers == 0 {
            self.run_inline(job);
            return;
        }
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.run_inline(job);
            }
        }
    }

    fn run_inline(&self, job: Job) {
        self.inline_runs.fetch_add(1, Ordering::Relaxed);
        run_isolated(job);
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        run_isolated(job);
    }
}

fn run_isolated(job: Job) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
        tracing::warn!("Dispatch job panicked");
    }
}

/// Runs a closure once every registered party has arrived.
pub(crate) struct Latch {
    remaining: AtomicUsize,
    action: Mutex<Option<Job>>,
}

impl Latch {
    pub(crate) fn new<F>(parties: usize, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            remaining: AtomicUsize::new(parties),
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Count one party in. The last one to arrive gets the action back.
    pub(crate) fn arrive(&self) -> Option<Box<dyn FnOnce() + Send + 'static>> {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.action.lock().take()
        } else {
            None
        }
    }
}

//! Coordinated shutdown of live WebSocket connections.
//!
//! `axum::serve(..).with_graceful_shutdown` stops accepting new requests,
//! but upgraded sockets run in their own tasks. Each socket handler holds a
//! [`ShutdownListener`]; the [`ShutdownHandle`] flips the flag and then
//! waits until every listener has been dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

/// Flips the shutdown flag. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Owned by the process entry point.
#[derive(Debug)]
pub struct ShutdownHandle {
    trigger: ShutdownTrigger,
    done: mpsc::Receiver<()>,
}

/// Held by every connection handler for as long as it runs.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    flag: watch::Receiver<bool>,
    _alive: mpsc::Sender<()>,
}

pub fn channel() -> (ShutdownHandle, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    let (alive_tx, alive_rx) = mpsc::channel(1);
    (
        ShutdownHandle {
            trigger: ShutdownTrigger(Arc::new(tx)),
            done: alive_rx,
        },
        ShutdownListener {
            flag: rx,
            _alive: alive_tx,
        },
    )
}

impl ShutdownHandle {
    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Trigger shutdown and wait for all listeners to go away.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn drain(mut self, timeout: Duration) -> bool {
        self.trigger.trigger();
        tokio::time::timeout(timeout, self.done.recv()).await.is_ok()
    }
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once shutdown has been triggered.
    ///
    /// Never resolves if the handle is dropped without triggering.
    pub async fn triggered(&mut self) {
        loop {
            if *self.flag.borrow_and_update() {
                return;
            }
            if self.flag.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

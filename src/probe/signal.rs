//! Bounded waits for asynchronous deliveries
//!
//! A probe arms a [`Latch`] before it triggers network traffic. Delivery
//! callbacks running on session event loop tasks call [`Latch::signal`]; the
//! probe then suspends in [`Latch::wait_up_to`] until the count reaches zero,
//! the timeout elapses or the run is interrupted.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitOutcome {
    Fired,
    TimedOut,
    Interrupted,
}

/// Countable gate signalled from delivery callbacks
#[derive(Debug, Clone)]
pub struct Latch {
    remaining: Arc<watch::Sender<usize>>,
    extra: Arc<AtomicUsize>,
}

impl Latch {
    /// Arm a latch that fires after `expected` signals
    pub fn new(expected: usize) -> Self {
        let (remaining, _) = watch::channel(expected);
        Self {
            remaining: Arc::new(remaining),
            extra: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Count down once. Returns false (and records an extra signal) when the
    /// latch had already fired.
    pub fn signal(&self) -> bool {
        let consumed = self.remaining.send_if_modified(|count| {
            if *count == 0 {
                return false;
            }
            *count -= 1;
            true
        });
        if !consumed {
            self.extra.fetch_add(1, Ordering::SeqCst);
        }
        consumed
    }

    /// Signals still needed before the latch fires
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Signals received after the latch fired
    pub fn extra_signals(&self) -> usize {
        self.extra.load(Ordering::SeqCst)
    }

    /// Wait until the count reaches zero, `timeout` elapses or `interrupt` fires
    pub async fn wait_up_to(&self, timeout: Duration, interrupt: &mut Interrupt) -> WaitOutcome {
        let mut count = self.remaining.subscribe();
        let fired = async move { count.wait_for(|remaining| *remaining == 0).await.is_ok() };

        tokio::select! {
            biased;
            result = tokio::time::timeout(timeout, fired) => match result {
                Ok(true) => WaitOutcome::Fired,
                _ => WaitOutcome::TimedOut,
            },
            _ = interrupt.fired() => WaitOutcome::Interrupted,
        }
    }
}

/// Owner side of the interrupt signal. Cheap to clone into signal handlers.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Interrupt current and future waits until [`InterruptHandle::reset`]
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waiter side for probe routines
    pub fn subscribe(&self) -> Interrupt {
        Interrupt {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter side of the interrupt signal
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// An interrupt that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_interrupted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once interrupted. Pending forever when the handle is gone.
    pub async fn fired(&mut self) {
        if self.rx.wait_for(|interrupted| *interrupted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Perform interruptible sleep
/// Returns true if sleep completed, false if interrupted
pub async fn interruptible_sleep(interrupt: &mut Interrupt, duration: Duration) -> bool {
    tokio::select! {
        _ = interrupt.fired() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// SPDX-License-Identifier: MPL-2.0

//! Driver notification.
//!
//! A [`Notifier`] is the escalation path from an accepted interrupt to
//! the owning driver process. It carries no content: the interrupt side
//! [`post`]s, the driver side [`dispatch`]es, and everything in between
//! is a single pending flag. If the driver has not consumed a previous
//! notification when a new one is posted, the two collapse into one; the
//! driver's handler is required to drain all outstanding device work on
//! each invocation rather than assume one notification per event.
//!
//! [`post`]: Notifier::post
//! [`dispatch`]: Notifier::dispatch

use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, Once};

use crate::prelude::Box;

/// Type alias for the notification callback.
pub type NotifyFn = dyn Fn() + Send + Sync + 'static;

/// Notification state shared between interrupt and driver context.
pub struct Notifier {
    pending: AtomicBool,
    masked: AtomicBool,
    handler: Once<Box<NotifyFn>>,
    // Serializes deliveries: two handler invocations for the same line
    // never overlap.
    gate: Mutex<()>,
}

impl Notifier {
    /// Creates a notifier with no handler and nothing pending.
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            masked: AtomicBool::new(false),
            handler: Once::new(),
            gate: Mutex::new(()),
        }
    }

    /// Records one notification.
    ///
    /// Interrupt context; never blocks. An undelivered notification
    /// absorbs later ones. Posts to a masked notifier are dropped.
    pub fn post(&self) {
        if self.masked.load(Ordering::Acquire) {
            return;
        }
        self.pending.store(true, Ordering::Release);
    }

    /// Registers the handler invoked once per delivered notification.
    ///
    /// The handler is bound once for the lifetime of the registration;
    /// later calls have no effect.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handler.call_once(|| Box::new(handler));
    }

    /// Delivers pending notifications, one handler invocation each.
    ///
    /// Driver context. Returns the number of invocations. Notifications
    /// posted while the handler runs are delivered before this returns;
    /// with no handler registered, nothing is consumed.
    pub fn dispatch(&self) -> usize {
        let Some(handler) = self.handler.get() else {
            return 0;
        };
        let _gate = self.gate.lock();

        let mut delivered = 0;
        while self.pending.swap(false, Ordering::AcqRel) {
            handler();
            delivered += 1;
        }
        delivered
    }

    /// Masks delivery and discards anything pending.
    ///
    /// Part of the detach path: once masked, the line's registration can
    /// be torn down without a late delivery touching freed driver state.
    pub fn mask(&self) {
        self.masked.store(true, Ordering::Release);
        self.pending.store(false, Ordering::Release);
    }

    /// Re-enables delivery.
    pub fn unmask(&self) {
        self.masked.store(false, Ordering::Release);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn posts_coalesce_into_one_delivery() {
        let notifier = Notifier::new();
        let count = std::sync::Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        notifier.set_handler(move || {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        notifier.post();
        notifier.post();
        notifier.post();

        assert_eq!(notifier.dispatch(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        // Nothing left once caught up.
        assert_eq!(notifier.dispatch(), 0);
    }

    #[test]
    fn no_handler_consumes_nothing() {
        let notifier = Notifier::new();
        notifier.post();
        assert_eq!(notifier.dispatch(), 0);

        // The pending notification survives until a handler exists.
        notifier.set_handler(|| {});
        assert_eq!(notifier.dispatch(), 1);
    }

    #[test]
    fn masked_posts_are_dropped() {
        let notifier = Notifier::new();
        notifier.set_handler(|| {});

        notifier.post();
        notifier.mask();
        assert_eq!(notifier.dispatch(), 0);

        notifier.post();
        assert_eq!(notifier.dispatch(), 0);

        notifier.unmask();
        notifier.post();
        assert_eq!(notifier.dispatch(), 1);
    }
}

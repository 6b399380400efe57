use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Something a blocked thread sleeps on and that can be woken from outside.
pub trait Wake: Send + Sync {
    fn wake_all(&self);
}

/// Per-context interruption flag.
///
/// `interrupt()` is callable from any thread. A thread blocked in a channel
/// wait registers the queue it sleeps on, so the interrupting thread can wake
/// it; the woken thread sees the flag and fails with an interrupted error.
/// Several threads of one context may be blocked at once, each registered
/// under its own token. All of them are woken; the first to observe the flag
/// consumes it.
#[derive(Default)]
pub struct Interrupt {
    flag: AtomicBool,
    next_token: AtomicU64,
    waiting_on: Mutex<Vec<(u64, Arc<dyn Wake>)>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // woken outside our lock; wake_all takes the queue's slot lock
        let targets: Vec<_> = self.waiting_on.lock().iter().map(|(_, t)| t.clone()).collect();
        for target in targets {
            target.wake_all();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Consumes a pending interrupt, returning whether there was one.
    pub fn clear(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    /// Registers `target` as one of the things this context is blocked on
    /// until the returned guard is dropped.
    pub(crate) fn enter(&self, target: Arc<dyn Wake>) -> WaitGuard<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.waiting_on.lock().push((token, target));
        WaitGuard { interrupt: self, token }
    }

    fn leave(&self, token: u64) {
        self.waiting_on.lock().retain(|(t, _)| *t != token);
    }

    /// Number of waits currently registered.
    pub fn waiters(&self) -> usize {
        self.waiting_on.lock().len()
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("interrupted", &self.is_interrupted())
            .field("waiters", &self.waiters())
            .finish()
    }
}

pub(crate) struct WaitGuard<'a> {
    interrupt: &'a Interrupt,
    token: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.interrupt.leave(self.token);
    }
}

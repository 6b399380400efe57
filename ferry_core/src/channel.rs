//! Single-slot rendezvous queues and the two-direction channel built on them.
//!
//! A queue holds at most one message. `send` blocks while the slot is
//! occupied, `receive` blocks while it is empty. Waits are woken by the
//! opposite operation, by [`Rendezvous::close`], or by the waiting context's
//! [`Interrupt`].
//!
//! Lost wakeups are avoided by ordering: a waiter registers with its
//! interrupt token before taking the slot lock and checks the interrupt flag
//! under that lock; [`Wake::wake_all`] takes the same lock before notifying.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::interrupt::{Interrupt, Wake};
use crate::transfer::Transferable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Closed,
    Interrupted,
}

struct Slot<T> {
    item: Option<T>,
    closed: bool,
}

pub struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Send + 'static> Rendezvous<T> {
    pub fn new() -> Self {
        Rendezvous {
            slot: Mutex::new(Slot { item: None, closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Deposits `item` once the slot is free. Does not wait for the receiver
    /// to take it.
    pub fn send(self: &Arc<Self>, item: T, interrupt: &Interrupt) -> Result<(), WaitError> {
        let _registered = interrupt.enter(self.clone());
        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return Err(WaitError::Closed);
            }
            if slot.item.is_none() {
                slot.item = Some(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            if interrupt.clear() {
                return Err(WaitError::Interrupted);
            }
            self.not_full.wait(&mut slot);
        }
    }

    pub fn receive(self: &Arc<Self>, interrupt: &Interrupt) -> Result<T, WaitError> {
        let _registered = interrupt.enter(self.clone());
        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return Err(WaitError::Closed);
            }
            if let Some(item) = slot.item.take() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if interrupt.clear() {
                return Err(WaitError::Interrupted);
            }
            self.not_empty.wait(&mut slot);
        }
    }

    /// Non-blocking receive. `Ok(None)` when the slot is empty.
    pub fn try_receive(&self) -> Result<Option<T>, WaitError> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(WaitError::Closed);
        }
        let item = slot.item.take();
        if item.is_some() {
            self.not_full.notify_one();
        }
        Ok(item)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().item.is_none()
    }

    /// Drops any pending message and fails every current and future wait.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        slot.item = None;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T: Send + 'static> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Wake for Rendezvous<T> {
    fn wake_all(&self) {
        let _slot = self.slot.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Which end of a channel a handle belongs to. The creator is the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Master,
    Worker,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Master => Side::Worker,
            Side::Worker => Side::Master,
        }
    }
}

/// A registry slot plus the side it is used from.
///
/// The raw form is the signed slot number: positive for the master side,
/// negative for the worker side. Slot 0 is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    pub slot: usize,
    pub side: Side,
}

impl ChannelHandle {
    pub fn to_raw(self) -> i64 {
        match self.side {
            Side::Master => self.slot as i64,
            Side::Worker => -(self.slot as i64),
        }
    }

    pub fn from_raw(raw: i64) -> Option<ChannelHandle> {
        if raw == 0 {
            return None;
        }
        let side = if raw > 0 { Side::Master } else { Side::Worker };
        Some(ChannelHandle {
            slot: raw.unsigned_abs() as usize,
            side,
        })
    }

    pub fn peer(self) -> ChannelHandle {
        ChannelHandle {
            slot: self.slot,
            side: self.side.other(),
        }
    }
}

pub struct Channel {
    slot: usize,
    key: i64,
    to_worker: Arc<Rendezvous<Transferable>>,
    to_master: Arc<Rendezvous<Transferable>>,
}

impl Channel {
    pub(crate) fn new(slot: usize, key: i64) -> Self {
        Channel {
            slot,
            key,
            to_worker: Arc::new(Rendezvous::new()),
            to_master: Arc::new(Rendezvous::new()),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Queue that `side` sends on.
    pub fn outbound(&self, side: Side) -> &Arc<Rendezvous<Transferable>> {
        match side {
            Side::Master => &self.to_worker,
            Side::Worker => &self.to_master,
        }
    }

    /// Queue that `side` receives from.
    pub fn inbound(&self, side: Side) -> &Arc<Rendezvous<Transferable>> {
        self.outbound(side.other())
    }

    pub(crate) fn close(&self) {
        self.to_worker.close();
        self.to_master.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("slot", &self.slot)
            .field("key", &self.key)
            .field("to_worker_empty", &self.to_worker.is_empty())
            .field("to_master_empty", &self.to_master.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn raw_handles_encode_side_in_sign() {
        let master = ChannelHandle { slot: 3, side: Side::Master };
        assert_eq!(master.to_raw(), 3);
        assert_eq!(master.peer().to_raw(), -3);
        assert_eq!(ChannelHandle::from_raw(-3), Some(master.peer()));
        assert_eq!(ChannelHandle::from_raw(0), None);
    }

    #[test]
    fn directions_are_independent() {
        let channel = Channel::new(1, 10);
        assert!(Arc::ptr_eq(channel.outbound(Side::Master), channel.inbound(Side::Worker)));
        assert!(Arc::ptr_eq(channel.outbound(Side::Worker), channel.inbound(Side::Master)));
        assert!(!Arc::ptr_eq(channel.outbound(Side::Master), channel.outbound(Side::Worker)));
    }

    #[test]
    fn second_send_waits_for_drain() {
        let queue = Arc::new(Rendezvous::<i32>::new());
        let interrupt = Interrupt::new();
        queue.send(1, &interrupt).unwrap();

        let sender = {
            let queue = queue.clone();
            thread::spawn(move || queue.send(2, &Interrupt::new()))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!sender.is_finished());

        assert_eq!(queue.receive(&interrupt), Ok(1));
        sender.join().unwrap().unwrap();
        assert_eq!(queue.try_receive(), Ok(Some(2)));
        assert_eq!(queue.try_receive(), Ok(None));
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let queue = Arc::new(Rendezvous::<i32>::new());
        let receiver = {
            let queue = queue.clone();
            thread::spawn(move || queue.receive(&Interrupt::new()))
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(receiver.join().unwrap(), Err(WaitError::Closed));
        assert_eq!(queue.try_receive(), Err(WaitError::Closed));
    }

    #[test]
    fn interrupt_wakes_blocked_receiver_and_is_consumed() {
        let queue = Arc::new(Rendezvous::<i32>::new());
        let interrupt = Arc::new(Interrupt::new());
        let receiver = {
            let queue = queue.clone();
            let interrupt = interrupt.clone();
            thread::spawn(move || {
                let first = queue.receive(&interrupt);
                (first, interrupt.is_interrupted())
            })
        };
        thread::sleep(Duration::from_millis(50));
        interrupt.interrupt();
        let (first, still_set) = receiver.join().unwrap();
        assert_eq!(first, Err(WaitError::Interrupted));
        assert!(!still_set);
    }

    #[test]
    fn pending_interrupt_does_not_fail_a_send_that_fits() {
        let queue = Arc::new(Rendezvous::<i32>::new());
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        assert_eq!(queue.send(1, &interrupt), Ok(()));
        assert_eq!(queue.send(2, &interrupt), Err(WaitError::Interrupted));
    }
}

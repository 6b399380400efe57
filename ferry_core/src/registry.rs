//! Table of live channels, keyed by caller-chosen positive integers.
//!
//! Slots are indexed from 1; slot 0 is never used so that a signed slot
//! number can carry the side. A closed slot keeps the [`CLOSED`] marker as its
//! key until it is reused, which lets a second close of the same handle
//! succeed while a close of a never-used slot fails.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelHandle, Side, WaitError};
use crate::context::Context;
use crate::error::ChannelError;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::transfer::{Materializer, Preparer, Transferable};
use crate::value::Value;

const FREE: i64 = 0;
const CLOSED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Slots allocated up front, including the reserved slot 0.
    pub initial_capacity: usize,
    /// Multiplier applied to the capacity when every slot is taken.
    pub grow_factor: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            initial_capacity: 4,
            grow_factor: 2,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.initial_capacity < 2 {
            return Err(ChannelError::InvalidConfig(format!(
                "initial_capacity must be at least 2, got {}",
                self.initial_capacity
            )));
        }
        if self.grow_factor < 2 {
            return Err(ChannelError::InvalidConfig(format!(
                "grow_factor must be at least 2, got {}",
                self.grow_factor
            )));
        }
        Ok(())
    }
}

struct Table {
    keys: Vec<i64>,
    channels: Vec<Option<Arc<Channel>>>,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Table {
            keys: vec![FREE; capacity],
            channels: vec![None; capacity],
        }
    }

    fn find_key(&self, key: i64) -> Option<usize> {
        (1..self.keys.len()).find(|&slot| self.keys[slot] == key && self.channels[slot].is_some())
    }

    fn free_slot(&self) -> Option<usize> {
        (1..self.channels.len()).find(|&slot| self.channels[slot].is_none())
    }

    /// Grows both arrays; existing entries keep their slot.
    fn grow(&mut self, factor: usize) -> usize {
        let old = self.keys.len();
        let new = old * factor;
        self.keys.resize(new, FREE);
        self.channels.resize(new, None);
        old
    }
}

pub struct ChannelRegistry {
    table: Mutex<Table>,
    config: RegistryConfig,
    telemetry_sink: RwLock<Option<TelemetrySink>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        let config = RegistryConfig::default();
        ChannelRegistry {
            table: Mutex::new(Table::with_capacity(config.initial_capacity)),
            config,
            telemetry_sink: RwLock::new(None),
        }
    }

    pub fn with_config(config: RegistryConfig) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(ChannelRegistry {
            table: Mutex::new(Table::with_capacity(config.initial_capacity)),
            config,
            telemetry_sink: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn set_telemetry_sink(&self, sink: TelemetrySink) {
        *self.telemetry_sink.write() = Some(sink);
    }

    fn emit(&self, event: TelemetryEvent, started: Instant, ok: bool) {
        if let Some(sink) = &*self.telemetry_sink.read() {
            sink(TelemetryEvent {
                duration_us: started.elapsed().as_micros(),
                ok,
                ..event
            });
        }
    }

    /// Creates a channel under `key` and returns the master-side handle.
    pub fn create(&self, key: i64) -> Result<ChannelHandle, ChannelError> {
        let started = Instant::now();
        let result = self.create_locked(key);
        let event = TelemetryEvent::new("create").key(key);
        match &result {
            Ok(handle) => {
                debug!(key, slot = handle.slot, "channel created");
                self.emit(event.handle(handle.to_raw()), started, true);
            }
            Err(err) => {
                debug!(key, code = err.code(), "channel create failed");
                self.emit(event, started, false);
            }
        }
        result
    }

    fn create_locked(&self, key: i64) -> Result<ChannelHandle, ChannelError> {
        if key <= 0 {
            return Err(ChannelError::InvalidKey(key));
        }
        let mut table = self.table.lock();
        if table.find_key(key).is_some() {
            return Err(ChannelError::DuplicateKey(key));
        }
        let slot = match table.free_slot() {
            Some(slot) => slot,
            None => {
                let slot = table.grow(self.config.grow_factor);
                debug!(capacity = table.keys.len(), "channel table grown");
                slot
            }
        };
        table.keys[slot] = key;
        table.channels[slot] = Some(Arc::new(Channel::new(slot, key)));
        Ok(ChannelHandle {
            slot,
            side: Side::Master,
        })
    }

    /// Looks `key` up and returns the worker-side handle.
    pub fn get(&self, key: i64) -> Result<ChannelHandle, ChannelError> {
        let started = Instant::now();
        let found = if key > 0 { self.table.lock().find_key(key) } else { None };
        let event = TelemetryEvent::new("get").key(key);
        match found {
            Some(slot) => {
                let handle = ChannelHandle {
                    slot,
                    side: Side::Worker,
                };
                debug!(key, slot, "channel found");
                self.emit(event.handle(handle.to_raw()), started, true);
                Ok(handle)
            }
            None => {
                self.emit(event, started, false);
                Err(ChannelError::not_found_key(key))
            }
        }
    }

    /// Closes the channel behind `handle`, from either side. Closing an
    /// already closed channel succeeds. Threads blocked on the channel are
    /// woken and fail with `NotFound`.
    pub fn close(&self, handle: ChannelHandle) -> Result<(), ChannelError> {
        let started = Instant::now();
        let event = TelemetryEvent::new("close").handle(handle.to_raw());
        let closed = {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let slot = handle.slot;
            if slot == 0 || slot >= table.channels.len() {
                Err(ChannelError::not_found_handle(handle.to_raw()))
            } else {
                match table.channels[slot].take() {
                    Some(channel) => {
                        table.keys[slot] = CLOSED;
                        Ok(Some(channel))
                    }
                    None if table.keys[slot] == CLOSED => Ok(None),
                    None => Err(ChannelError::not_found_handle(handle.to_raw())),
                }
            }
        };

        match closed {
            Ok(channel) => {
                if let Some(channel) = channel {
                    channel.close();
                    debug!(slot = handle.slot, key = channel.key(), "channel closed");
                }
                self.emit(event, started, true);
                Ok(())
            }
            Err(err) => {
                self.emit(event, started, false);
                Err(err)
            }
        }
    }

    pub fn channel(&self, handle: ChannelHandle) -> Result<Arc<Channel>, ChannelError> {
        let table = self.table.lock();
        table
            .channels
            .get(handle.slot)
            .and_then(|c| c.clone())
            .filter(|_| handle.slot > 0)
            .ok_or_else(|| ChannelError::not_found_handle(handle.to_raw()))
    }

    /// Converts `value` in the sending context `ctx` and deposits it on the
    /// queue toward the other side, waiting while that queue is occupied.
    pub fn send(&self, ctx: &Context, handle: ChannelHandle, value: &Value) -> Result<(), ChannelError> {
        let started = Instant::now();
        let event = TelemetryEvent::new("send").handle(handle.to_raw());
        let result = self.send_inner(ctx, handle, value);
        match &result {
            Ok(variant) => {
                debug!(context = ctx.name(), handle = handle.to_raw(), variant, "message sent");
                self.emit(event.transferable(variant), started, true);
            }
            Err(err) => {
                warn!(context = ctx.name(), handle = handle.to_raw(), code = err.code(), "send failed: {}", err);
                self.emit(event, started, false);
            }
        }
        result.map(|_| ())
    }

    fn send_inner(&self, ctx: &Context, handle: ChannelHandle, value: &Value) -> Result<&'static str, ChannelError> {
        let channel = self.channel(handle)?;
        let message = Preparer::new(ctx).prepare(value)?;
        let variant = message.describe();
        channel
            .outbound(handle.side)
            .send(message, ctx.interrupt())
            .map_err(|e| wait_error(e, "send", handle))?;
        Ok(variant)
    }

    /// Waits for the next message from the other side and materializes it in
    /// the receiving context `ctx`.
    pub fn receive(&self, ctx: &Context, handle: ChannelHandle) -> Result<Value, ChannelError> {
        let started = Instant::now();
        let event = TelemetryEvent::new("receive").handle(handle.to_raw());
        let result = self.channel(handle).and_then(|channel| {
            channel
                .inbound(handle.side)
                .receive(ctx.interrupt())
                .map_err(|e| wait_error(e, "receive", handle))
        });
        self.finish_receive(ctx, handle, event, started, result.map(Some))
            .and_then(|v| v.ok_or_else(|| ChannelError::Transfer("receive produced no message".into())))
    }

    /// Non-blocking receive; `Ok(None)` when nothing is waiting.
    pub fn poll(&self, ctx: &Context, handle: ChannelHandle) -> Result<Option<Value>, ChannelError> {
        let started = Instant::now();
        let event = TelemetryEvent::new("poll").handle(handle.to_raw());
        let result = self.channel(handle).and_then(|channel| {
            channel
                .inbound(handle.side)
                .try_receive()
                .map_err(|e| wait_error(e, "poll", handle))
        });
        self.finish_receive(ctx, handle, event, started, result)
    }

    fn finish_receive(
        &self,
        ctx: &Context,
        handle: ChannelHandle,
        event: TelemetryEvent,
        started: Instant,
        received: Result<Option<Transferable>, ChannelError>,
    ) -> Result<Option<Value>, ChannelError> {
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.emit(event, started, true);
                return Ok(None);
            }
            Err(err) => {
                warn!(context = ctx.name(), handle = handle.to_raw(), code = err.code(), "{} failed: {}", event.op, err);
                self.emit(event, started, false);
                return Err(err);
            }
        };
        let variant = message.describe();
        let event = event.transferable(variant);
        match Materializer::new(ctx).materialize(message) {
            Ok(value) => {
                debug!(context = ctx.name(), handle = handle.to_raw(), variant, "message received");
                self.emit(event, started, true);
                Ok(Some(value))
            }
            Err(err) => {
                warn!(context = ctx.name(), handle = handle.to_raw(), code = err.code(), "materialize failed: {}", err);
                self.emit(event, started, false);
                Err(err)
            }
        }
    }

    /// Number of open channels.
    pub fn live_channels(&self) -> usize {
        self.table.lock().channels.iter().filter(|c| c.is_some()).count()
    }

    /// Allocated slots, including the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.table.lock().keys.len()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("config", &self.config)
            .field("capacity", &self.capacity())
            .field("live_channels", &self.live_channels())
            .finish()
    }
}

fn wait_error(err: WaitError, op: &'static str, handle: ChannelHandle) -> ChannelError {
    match err {
        WaitError::Closed => ChannelError::not_found_handle(handle.to_raw()),
        WaitError::Interrupted => ChannelError::Interrupted { op },
    }
}

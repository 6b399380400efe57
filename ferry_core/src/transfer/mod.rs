//! Conversion of values between contexts.
//!
//! [`Preparer`] turns a value owned by the sending context into a
//! [`Transferable`]: everything in it is either marked permanently shared or
//! is a private copy nobody in the sender can reach. [`Materializer`] turns a
//! `Transferable` back into a value owned by the receiving context.

mod materialize;
mod prepare;

pub use materialize::*;
pub use prepare::*;

use crate::value::{Value, ValueKind};

/// Attribute mapping in transferable form, in the original order.
pub type TransferAttributes = Vec<(String, Transferable)>;

#[derive(Debug)]
pub enum Transferable {
    /// Shared value, handed over as is.
    Plain(Value),
    /// List whose elements needed conversion. `shell` is a private shallow
    /// copy that the receiver fills in place.
    List {
        shell: Value,
        items: Vec<Transferable>,
        attributes: Option<TransferAttributes>,
    },
    /// One local environment frame. `id` is unique within a message.
    Env {
        id: u32,
        bindings: Vec<(String, Transferable)>,
        parent: Option<Box<Transferable>>,
        attributes: Option<TransferAttributes>,
    },
    /// An environment already captured earlier in the same message.
    EnvRef(u32),
    /// Lazy binding. Evaluated promises carry `value` and no `env`.
    Promise {
        env: Option<Box<Transferable>>,
        value: Option<Box<Transferable>>,
        expr: Vec<u8>,
    },
    /// Codec-encoded value with its attributes carried separately.
    Opaque {
        kind: ValueKind,
        blob: Vec<u8>,
        attributes: Option<TransferAttributes>,
    },
    /// Private copy of a shared base value, with converted attributes.
    Attributed {
        base: Box<Transferable>,
        attributes: TransferAttributes,
    },
}

impl Transferable {
    pub fn describe(&self) -> &'static str {
        match self {
            Transferable::Plain(_) => "plain",
            Transferable::List { .. } => "list",
            Transferable::Env { .. } => "env",
            Transferable::EnvRef(_) => "env-ref",
            Transferable::Promise { .. } => "promise",
            Transferable::Opaque { .. } => "opaque",
            Transferable::Attributed { .. } => "attributed",
        }
    }

    /// True when this is `Plain` holding exactly `value`.
    pub fn is_plain(&self, value: &Value) -> bool {
        matches!(self, Transferable::Plain(v) if v.ptr_eq(value))
    }
}

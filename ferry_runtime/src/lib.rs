use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

pub use ferry_core::{ChannelError, ChannelHandle, ChannelRegistry, Context, Value};

mod channels;
pub mod helpers;

pub use channels::register_channel_builtins;

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{0}")]
    Argument(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// What a builtin runs against: the calling context and the registry it
/// shares with the other contexts.
#[derive(Debug, Clone)]
pub struct Session {
    pub context: Arc<Context>,
    pub registry: Arc<ChannelRegistry>,
}

impl Session {
    pub fn new(context: Arc<Context>, registry: Arc<ChannelRegistry>) -> Self {
        Session { context, registry }
    }
}

pub type NativeFn = fn(&Session, Vec<Value>) -> Result<Value, BuiltinError>;

/// Name to native function table, shared by every session of a process.
#[derive(Default)]
pub struct Builtins {
    functions: RwLock<HashMap<String, NativeFn>>,
}

impl Builtins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.functions.read().get(name).copied()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn call(&self, session: &Session, name: &str, args: Vec<Value>) -> Result<Value, BuiltinError> {
        let f = self
            .get(name)
            .ok_or_else(|| BuiltinError::UnknownFunction(name.to_string()))?;
        f(session, args)
    }
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtins").field("names", &self.names()).finish()
    }
}

/// Register a single function and return its name for export tracking
pub fn register_fn(builtins: &Builtins, name: &str, f: NativeFn) -> String {
    builtins.functions.write().insert(name.to_string(), f);
    name.to_string()
}

/// Register multiple functions at once and return all their names
pub fn register_functions(builtins: &Builtins, functions: &[(&str, NativeFn)]) -> Vec<String> {
    functions
        .iter()
        .map(|(name, func)| register_fn(builtins, name, *func))
        .collect()
}

/// Convenience macro for registering multiple functions
#[macro_export]
macro_rules! register_module {
    ($builtins:expr, $($name:expr => $func:expr),+ $(,)?) => {
        {
            let functions: &[(&str, $crate::NativeFn)] = &[
                $(($name, $func as $crate::NativeFn)),+
            ];
            $crate::register_functions($builtins, functions)
        }
    };
}

/// Values builtins hand back to the interpreter
pub mod values {
    use super::*;

    pub fn nil() -> Value {
        Value::null()
    }

    /// Channel id as an integer scalar. Fails when the slot number no longer
    /// fits the interpreter's 32-bit integers.
    pub fn handle(handle: ChannelHandle) -> Result<Value, BuiltinError> {
        let raw = handle.to_raw();
        i32::try_from(raw)
            .map(Value::int)
            .map_err(|_| BuiltinError::Argument(format!("channel id {} does not fit an integer value", raw)))
    }
}

/// Helper functions for reading builtin arguments
pub mod extract {
    use super::*;
    use ferry_core::value::Vector;

    /// Integer scalar, or a double scalar holding a whole number.
    pub fn integer(val: &Value) -> Result<i64, String> {
        match val.vector_data() {
            Some(Vector::Integer(v)) if v.len() == 1 => Ok(v[0] as i64),
            // i64::MAX as f64 rounds up to 2^63, which is itself out of range
            Some(Vector::Double(v))
                if v.len() == 1 && v[0].fract() == 0.0 && v[0] >= i64::MIN as f64 && v[0] < i64::MAX as f64 =>
            {
                Ok(v[0] as i64)
            }
            _ => Err(format!("Expected integer scalar, got {}", val.kind())),
        }
    }

    pub fn string(val: &Value) -> Result<String, String> {
        match val.vector_data() {
            Some(Vector::Character(v)) if v.len() == 1 => Ok(v[0].clone()),
            _ => Err(format!("Expected string scalar, got {}", val.kind())),
        }
    }

    pub fn handle(val: &Value) -> Result<ChannelHandle, String> {
        let raw = integer(val)?;
        ChannelHandle::from_raw(raw).ok_or_else(|| format!("Invalid channel id {}", raw))
    }
}

use std::fmt::{self, Display};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Which environment a frame is. Everything except `Local` is owned by a
/// context and only ever crosses a channel by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvKind {
    Empty,
    Base,
    BaseNamespace,
    Global,
    Package(String),
    Namespace(String),
    Local,
}

impl EnvKind {
    pub fn is_local(&self) -> bool {
        matches!(self, EnvKind::Local)
    }
}

impl Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvKind::Empty => write!(f, "<environment: R_EmptyEnv>"),
            EnvKind::Base => write!(f, "<environment: base>"),
            EnvKind::BaseNamespace => write!(f, "<environment: namespace:base>"),
            EnvKind::Global => write!(f, "<environment: R_GlobalEnv>"),
            EnvKind::Package(name) => write!(f, "<environment: package:{}>", name),
            EnvKind::Namespace(name) => write!(f, "<environment: namespace:{}>", name),
            EnvKind::Local => write!(f, "<environment>"),
        }
    }
}

/// Storage behind an environment value: ordered bindings plus the lexical parent.
#[derive(Debug)]
pub struct Frame {
    kind: EnvKind,
    bindings: RwLock<Vec<(String, Value)>>,
    parent: RwLock<Option<Value>>,
}

impl Frame {
    pub(crate) fn new(kind: EnvKind, parent: Option<Value>) -> Self {
        Frame {
            kind,
            bindings: RwLock::new(Vec::new()),
            parent: RwLock::new(parent),
        }
    }

    pub fn kind(&self) -> &EnvKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<Value> {
        self.parent.read().clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<Value>) {
        *self.parent.write() = parent;
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.read().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.bindings.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Keeps first-definition order; redefinition replaces in place.
    pub(crate) fn define(&self, name: &str, value: Value) {
        let mut bindings = self.bindings.write();
        match bindings.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => bindings.push((name.to_string(), value)),
        }
    }
}

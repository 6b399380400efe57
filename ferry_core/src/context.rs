use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::{MsgPackCodec, SerializationCodec};
use crate::interrupt::Interrupt;
use crate::value::{EnvKind, Value};

/// Environment storage as seen by the transfer protocol and the codec.
pub trait FrameAccess {
    /// Bindings of `env` in definition order. Empty for non-environments.
    fn bindings(&self, env: &Value) -> Vec<(String, Value)>;

    fn get_binding(&self, env: &Value, name: &str) -> Option<Value>;

    /// New local environment enclosed by `parent`.
    fn new_env(&self, parent: &Value) -> Value;

    fn define(&self, env: &Value, name: &str, value: Value);

    fn set_parent(&self, env: &Value, parent: &Value);

    /// This context's instance of a non-local environment, if it has one.
    fn well_known(&self, kind: &EnvKind) -> Option<Value>;
}

/// One isolated execution context: its own fixed environments, attached
/// packages, loaded namespaces and interruption flag.
pub struct Context {
    name: String,
    empty: Value,
    base: Value,
    base_namespace: Value,
    global: Value,
    packages: RwLock<HashMap<String, Value>>,
    namespaces: RwLock<HashMap<String, Value>>,
    codec: Arc<dyn SerializationCodec>,
    interrupt: Arc<Interrupt>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_codec(name, Arc::new(MsgPackCodec::new()))
    }

    pub fn with_codec(name: impl Into<String>, codec: Arc<dyn SerializationCodec>) -> Self {
        let empty = Value::environment(EnvKind::Empty, None);
        let base = Value::environment(EnvKind::Base, Some(empty.clone()));
        let global = Value::environment(EnvKind::Global, Some(base.clone()));
        let base_namespace = Value::environment(EnvKind::BaseNamespace, Some(global.clone()));
        Context {
            name: name.into(),
            empty,
            base,
            base_namespace,
            global,
            packages: RwLock::new(HashMap::new()),
            namespaces: RwLock::new(HashMap::new()),
            codec,
            interrupt: Arc::new(Interrupt::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn empty_env(&self) -> Value {
        self.empty.clone()
    }

    pub fn base_env(&self) -> Value {
        self.base.clone()
    }

    pub fn base_namespace(&self) -> Value {
        self.base_namespace.clone()
    }

    pub fn global_env(&self) -> Value {
        self.global.clone()
    }

    pub fn codec(&self) -> &dyn SerializationCodec {
        self.codec.as_ref()
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    /// Handle another thread can use to interrupt this context.
    pub fn interrupter(&self) -> Arc<Interrupt> {
        self.interrupt.clone()
    }

    /// Attaches a package environment directly below the global environment.
    /// Attaching an already attached package returns the existing environment.
    pub fn attach_package(&self, name: &str) -> Value {
        let mut packages = self.packages.write();
        if let Some(env) = packages.get(name) {
            return env.clone();
        }
        let below_global = self.global.frame().and_then(|f| f.parent());
        let env = Value::environment(EnvKind::Package(name.to_string()), below_global);
        if let Some(frame) = self.global.frame() {
            frame.set_parent(Some(env.clone()));
        }
        packages.insert(name.to_string(), env.clone());
        env
    }

    pub fn load_namespace(&self, name: &str) -> Value {
        self.namespaces
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Value::environment(EnvKind::Namespace(name.to_string()), Some(self.base_namespace.clone()))
            })
            .clone()
    }

    pub fn package_env(&self, name: &str) -> Option<Value> {
        self.packages.read().get(name).cloned()
    }

    pub fn namespace_env(&self, name: &str) -> Option<Value> {
        self.namespaces.read().get(name).cloned()
    }

    /// Looks `name` up along the parent chain starting at `env`.
    pub fn lookup(&self, env: &Value, name: &str) -> Option<Value> {
        let mut current = Some(env.clone());
        while let Some(env) = current {
            let frame = env.frame()?;
            if let Some(value) = frame.get(name) {
                return Some(value);
            }
            current = frame.parent();
        }
        None
    }
}

impl FrameAccess for Context {
    fn bindings(&self, env: &Value) -> Vec<(String, Value)> {
        env.frame().map(|f| f.bindings()).unwrap_or_default()
    }

    fn get_binding(&self, env: &Value, name: &str) -> Option<Value> {
        env.frame().and_then(|f| f.get(name))
    }

    fn new_env(&self, parent: &Value) -> Value {
        Value::environment(EnvKind::Local, Some(parent.clone()))
    }

    fn define(&self, env: &Value, name: &str, value: Value) {
        if let Some(frame) = env.frame() {
            frame.define(name, value);
        }
    }

    fn set_parent(&self, env: &Value, parent: &Value) {
        if let Some(frame) = env.frame() {
            frame.set_parent(Some(parent.clone()));
        }
    }

    fn well_known(&self, kind: &EnvKind) -> Option<Value> {
        match kind {
            EnvKind::Empty => Some(self.empty_env()),
            EnvKind::Base => Some(self.base_env()),
            EnvKind::BaseNamespace => Some(self.base_namespace()),
            EnvKind::Global => Some(self.global_env()),
            EnvKind::Package(name) => self.package_env(name),
            EnvKind::Namespace(name) => self.namespace_env(name),
            EnvKind::Local => None,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("packages", &self.packages.read().keys().collect::<Vec<_>>())
            .field("namespaces", &self.namespaces.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

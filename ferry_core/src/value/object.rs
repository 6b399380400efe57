use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::value::{Attributes, EnvKind, Expr, Frame};

static NULL: OnceLock<Value> = OnceLock::new();
static UNBOUND: OnceLock<Value> = OnceLock::new();

#[derive(Clone, Debug, PartialEq)]
pub enum Vector {
    Logical(Vec<bool>),
    Integer(Vec<i32>),
    Double(Vec<f64>),
    Character(Vec<String>),
}

impl Vector {
    pub fn len(&self) -> usize {
        match self {
            Vector::Logical(v) => v.len(),
            Vector::Integer(v) => v.len(),
            Vector::Double(v) => v.len(),
            Vector::Character(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Vector::Logical(_) => ValueKind::Logical,
            Vector::Integer(_) => ValueKind::Integer,
            Vector::Double(_) => ValueKind::Double,
            Vector::Character(_) => ValueKind::Character,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Unbound,
    Logical,
    Integer,
    Double,
    Character,
    List,
    Environment,
    Promise,
    Closure,
    Language,
    Connection,
}

impl ValueKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueKind::Null => "NULL",
            ValueKind::Unbound => "unbound",
            ValueKind::Logical => "logical",
            ValueKind::Integer => "integer",
            ValueKind::Double => "double",
            ValueKind::Character => "character",
            ValueKind::List => "list",
            ValueKind::Environment => "environment",
            ValueKind::Promise => "promise",
            ValueKind::Closure => "closure",
            ValueKind::Language => "language",
            ValueKind::Connection => "connection",
        }
    }

    /// Kinds that cannot be decomposed structurally and go through the codec.
    pub fn needs_serialization(&self) -> bool {
        matches!(
            self,
            ValueKind::Closure | ValueKind::Environment | ValueKind::Connection | ValueKind::Language
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Lazily evaluated binding.
#[derive(Debug)]
pub struct Promise {
    expr: Expr,
    env: Option<Value>,
    value: RwLock<Option<Value>>,
}

impl Promise {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Defining environment; `None` means the global environment.
    pub fn env(&self) -> Option<&Value> {
        self.env.as_ref()
    }

    pub fn value(&self) -> Option<Value> {
        self.value.read().clone()
    }

    pub fn is_evaluated(&self) -> bool {
        self.value.read().is_some()
    }

    /// Records the forced value. A promise is forced at most once.
    pub fn deliver(&self, value: Value) -> bool {
        let mut slot = self.value.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }
}

#[derive(Debug, Clone)]
pub struct Closure {
    pub formals: Vec<String>,
    pub body: Expr,
    pub env: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: u32,
    pub description: String,
    pub class: String,
}

#[derive(Debug)]
struct ObjectHeader {
    shared: AtomicBool,
    attributes: RwLock<Option<Attributes>>,
}

#[derive(Debug)]
pub(crate) enum Body {
    Null,
    Unbound,
    Vector(RwLock<Vector>),
    List(RwLock<Vec<Value>>),
    Environment(Frame),
    Promise(Promise),
    Closure(Closure),
    Language(Expr),
    Connection(Connection),
}

#[derive(Debug)]
struct Object {
    header: ObjectHeader,
    body: Body,
}

/// Reference-counted handle to an interpreter object.
///
/// Cloning a `Value` aliases the object. Owner-side mutators copy first when
/// the object has been marked shared, so a shared object is never written to.
#[derive(Clone)]
pub struct Value(Arc<Object>);

impl Value {
    fn alloc(body: Body) -> Value {
        Value(Arc::new(Object {
            header: ObjectHeader {
                shared: AtomicBool::new(false),
                attributes: RwLock::new(None),
            },
            body,
        }))
    }

    pub fn null() -> Value {
        NULL.get_or_init(|| {
            let v = Value::alloc(Body::Null);
            v.make_shared_permanent();
            v
        })
        .clone()
    }

    pub fn unbound() -> Value {
        UNBOUND
            .get_or_init(|| {
                let v = Value::alloc(Body::Unbound);
                v.make_shared_permanent();
                v
            })
            .clone()
    }

    pub fn vector(data: Vector) -> Value {
        Value::alloc(Body::Vector(RwLock::new(data)))
    }

    pub fn logical(data: Vec<bool>) -> Value {
        Value::vector(Vector::Logical(data))
    }

    pub fn integer(data: Vec<i32>) -> Value {
        Value::vector(Vector::Integer(data))
    }

    pub fn double(data: Vec<f64>) -> Value {
        Value::vector(Vector::Double(data))
    }

    pub fn character<I, S>(data: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::vector(Vector::Character(data.into_iter().map(Into::into).collect()))
    }

    pub fn int(n: i32) -> Value {
        Value::integer(vec![n])
    }

    pub fn num(n: f64) -> Value {
        Value::double(vec![n])
    }

    pub fn string(s: &str) -> Value {
        Value::character([s])
    }

    pub fn boolean(b: bool) -> Value {
        Value::logical(vec![b])
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::alloc(Body::List(RwLock::new(items)))
    }

    pub fn language(expr: Expr) -> Value {
        Value::alloc(Body::Language(expr))
    }

    pub fn closure(formals: Vec<String>, body: Expr, env: Value) -> Value {
        Value::alloc(Body::Closure(Closure { formals, body, env }))
    }

    pub fn connection(id: u32, description: &str, class: &str) -> Value {
        Value::alloc(Body::Connection(Connection {
            id,
            description: description.to_string(),
            class: class.to_string(),
        }))
    }

    /// Unevaluated promise. `env == None` stands for the global environment.
    pub fn promise(expr: Expr, env: Option<Value>) -> Value {
        Value::promise_from_parts(expr, env, None)
    }

    pub fn evaluated_promise(expr: Expr, value: Value) -> Value {
        Value::promise_from_parts(expr, None, Some(value))
    }

    pub(crate) fn promise_from_parts(expr: Expr, env: Option<Value>, value: Option<Value>) -> Value {
        Value::alloc(Body::Promise(Promise {
            expr,
            env,
            value: RwLock::new(value),
        }))
    }

    pub(crate) fn environment(kind: EnvKind, parent: Option<Value>) -> Value {
        Value::alloc(Body::Environment(Frame::new(kind, parent)))
    }

    pub(crate) fn body(&self) -> &Body {
        &self.0.body
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn kind(&self) -> ValueKind {
        match self.body() {
            Body::Null => ValueKind::Null,
            Body::Unbound => ValueKind::Unbound,
            Body::Vector(v) => v.read().kind(),
            Body::List(_) => ValueKind::List,
            Body::Environment(_) => ValueKind::Environment,
            Body::Promise(_) => ValueKind::Promise,
            Body::Closure(_) => ValueKind::Closure,
            Body::Language(_) => ValueKind::Language,
            Body::Connection(_) => ValueKind::Connection,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.body(), Body::Null)
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self.body(), Body::Unbound)
    }

    pub fn is_environment(&self) -> bool {
        matches!(self.body(), Body::Environment(_))
    }

    pub fn vector_data(&self) -> Option<Vector> {
        match self.body() {
            Body::Vector(v) => Some(v.read().clone()),
            _ => None,
        }
    }

    pub fn list_elements(&self) -> Option<Vec<Value>> {
        match self.body() {
            Body::List(items) => Some(items.read().clone()),
            _ => None,
        }
    }

    pub fn length(&self) -> usize {
        match self.body() {
            Body::Null => 0,
            Body::Vector(v) => v.read().len(),
            Body::List(items) => items.read().len(),
            Body::Environment(frame) => frame.len(),
            _ => 1,
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self.body() {
            Body::Environment(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn promise_data(&self) -> Option<&Promise> {
        match self.body() {
            Body::Promise(p) => Some(p),
            _ => None,
        }
    }

    pub fn closure_data(&self) -> Option<&Closure> {
        match self.body() {
            Body::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn language_expr(&self) -> Option<&Expr> {
        match self.body() {
            Body::Language(e) => Some(e),
            _ => None,
        }
    }

    pub fn connection_data(&self) -> Option<&Connection> {
        match self.body() {
            Body::Connection(c) => Some(c),
            _ => None,
        }
    }

    /// Kinds whose owner can promise never to write to them again.
    pub fn is_shareable(&self) -> bool {
        matches!(
            self.body(),
            Body::Null | Body::Unbound | Body::Vector(_) | Body::List(_) | Body::Language(_)
        )
    }

    pub fn is_shared(&self) -> bool {
        self.0.header.shared.load(Ordering::Acquire)
    }

    /// Marks the object permanently shared. Irreversible. Returns `true` the
    /// first time the mark is applied.
    pub fn make_shared_permanent(&self) -> bool {
        if !self.is_shareable() {
            return false;
        }
        !self.0.header.shared.swap(true, Ordering::AcqRel)
    }

    pub fn attributes(&self) -> Option<Attributes> {
        self.0.header.attributes.read().clone()
    }

    pub fn has_attributes(&self) -> bool {
        self.0
            .header
            .attributes
            .read()
            .as_ref()
            .map_or(false, |a| !a.is_empty())
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.0
            .header
            .attributes
            .read()
            .as_ref()
            .and_then(|a| a.get(name).cloned())
    }

    // In-place; only for objects nobody else can observe yet.
    pub(crate) fn init_attributes(&self, attributes: Option<Attributes>) {
        *self.0.header.attributes.write() = attributes.filter(|a| !a.is_empty());
    }

    pub(crate) fn take_attributes(&self) -> Option<Attributes> {
        self.0.header.attributes.write().take()
    }

    /// Fresh, unshared object with the same contents. List elements are
    /// aliased, atomic data and the attribute mapping are copied. Objects with
    /// reference semantics (environments, the singletons) return themselves.
    pub fn shallow_copy(&self) -> Value {
        let copy = self.shallow_copy_without_attributes();
        if !copy.ptr_eq(self) {
            copy.init_attributes(self.attributes());
        }
        copy
    }

    pub(crate) fn shallow_copy_without_attributes(&self) -> Value {
        match self.body() {
            Body::Null | Body::Unbound | Body::Environment(_) => self.clone(),
            Body::Vector(v) => Value::vector(v.read().clone()),
            Body::List(items) => Value::list(items.read().clone()),
            Body::Promise(p) => Value::promise_from_parts(p.expr.clone(), p.env.clone(), p.value()),
            Body::Closure(c) => Value::alloc(Body::Closure(c.clone())),
            Body::Language(e) => Value::language(e.clone()),
            Body::Connection(c) => Value::alloc(Body::Connection(c.clone())),
        }
    }

    fn make_private(&mut self) {
        if self.is_shared() {
            *self = self.shallow_copy();
        }
    }

    pub fn set_attr(&mut self, name: &str, value: Value) {
        self.make_private();
        let mut attrs = self.0.header.attributes.write();
        let map = attrs.get_or_insert_with(Attributes::new);
        map.set(name, value);
        if map.is_empty() {
            *attrs = None;
        }
    }

    pub fn set_element(&mut self, index: usize, value: Value) -> Result<(), String> {
        if !matches!(self.body(), Body::List(_)) {
            return Err(format!("Expected list, got {}", self.kind()));
        }
        self.make_private();
        match self.body() {
            Body::List(items) => {
                let mut items = items.write();
                let len = items.len();
                let slot = items
                    .get_mut(index)
                    .ok_or_else(|| format!("Index {} out of bounds for list of length {}", index, len))?;
                *slot = value;
                Ok(())
            }
            _ => Err(format!("Expected list, got {}", self.kind())),
        }
    }

    pub fn push_element(&mut self, value: Value) -> Result<(), String> {
        if !matches!(self.body(), Body::List(_)) {
            return Err(format!("Expected list, got {}", self.kind()));
        }
        self.make_private();
        match self.body() {
            Body::List(items) => {
                items.write().push(value);
                Ok(())
            }
            _ => Err(format!("Expected list, got {}", self.kind())),
        }
    }

    /// Applies `f` to the atomic data, copying first if the vector is shared.
    /// `f` must not change the vector's type.
    pub fn update_vector<F>(&mut self, f: F) -> Result<(), String>
    where
        F: FnOnce(&mut Vector),
    {
        if !matches!(self.body(), Body::Vector(_)) {
            return Err(format!("Expected atomic vector, got {}", self.kind()));
        }
        self.make_private();
        match self.body() {
            Body::Vector(v) => {
                let mut data = v.write();
                let mut updated = data.clone();
                f(&mut updated);
                if updated.kind() != data.kind() {
                    return Err(format!("Vector changed type from {} to {}", data.kind(), updated.kind()));
                }
                *data = updated;
                Ok(())
            }
            _ => Err(format!("Expected atomic vector, got {}", self.kind())),
        }
    }

    /// Deep structural equality. Environments compare by identity.
    pub fn identical(a: &Value, b: &Value) -> bool {
        if a.ptr_eq(b) {
            return true;
        }
        if !identical_attributes(a, b) {
            return false;
        }
        match (a.body(), b.body()) {
            (Body::Null, Body::Null) | (Body::Unbound, Body::Unbound) => true,
            (Body::Vector(x), Body::Vector(y)) => *x.read() == *y.read(),
            (Body::List(x), Body::List(y)) => {
                let (x, y) = (x.read(), y.read());
                x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| Value::identical(p, q))
            }
            (Body::Environment(_), Body::Environment(_)) => false,
            (Body::Promise(x), Body::Promise(y)) => {
                x.expr == y.expr
                    && match (x.value(), y.value()) {
                        (Some(p), Some(q)) => Value::identical(&p, &q),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Body::Closure(x), Body::Closure(y)) => {
                x.formals == y.formals && x.body == y.body && Value::identical(&x.env, &y.env)
            }
            (Body::Language(x), Body::Language(y)) => x == y,
            (Body::Connection(x), Body::Connection(y)) => x == y,
            _ => false,
        }
    }
}

fn identical_attributes(a: &Value, b: &Value) -> bool {
    let (x, y) = (a.attributes().unwrap_or_default(), b.attributes().unwrap_or_default());
    x.len() == y.len()
        && x.iter().all(|(name, v)| y.get(name).map_or(false, |w| Value::identical(v, w)))
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body() {
            Body::Null => write!(f, "NULL"),
            Body::Unbound => write!(f, "<unbound>"),
            Body::Vector(v) => write!(f, "{:?}", *v.read()),
            Body::List(items) => f.debug_list().entries(items.read().iter()).finish(),
            // parents and bindings may loop back; print names only
            Body::Environment(frame) => write!(f, "{} {:?}", frame.kind(), frame.names()),
            Body::Promise(p) => write!(f, "<promise {:?} evaluated={}>", p.expr, p.is_evaluated()),
            Body::Closure(c) => write!(f, "<closure ({}) {:?}>", c.formals.join(", "), c.body),
            Body::Language(e) => write!(f, "{:?}", e),
            Body::Connection(c) => write!(f, "<connection {} {}>", c.id, c.description),
        }
    }
}

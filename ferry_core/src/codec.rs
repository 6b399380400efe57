//! Full serialization of value graphs, used for objects the transfer protocol
//! cannot decompose (closures, connections, language objects, non-local
//! environments) and for promise expressions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::FrameAccess;
use crate::value::{Attributes, Body, EnvKind, Expr, Value, Vector};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("environment reference #{0} does not point at an earlier environment")]
    DanglingReference(u32),
    #[error("{0} is not available in the receiving context")]
    UnknownEnvironment(EnvKind),
    #[error("expression did not survive deparse/parse: {0}")]
    Reparse(#[from] crate::parser::ParseError),
}

/// Encodes and decodes opaque value graphs. Decoding happens in the receiving
/// context, which supplies environment construction and resolves environments
/// that travel by name.
pub trait SerializationCodec: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn unserialize(&self, frames: &dyn FrameAccess, bytes: &[u8]) -> Result<Value, CodecError>;

    fn serialize_expr(&self, expr: &Expr) -> Result<Vec<u8>, CodecError>;

    fn unserialize_expr(&self, bytes: &[u8]) -> Result<Expr, CodecError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Node {
    item: Item,
    attributes: Vec<(String, Node)>,
}

#[derive(Debug, Serialize, Deserialize)]
enum Item {
    Null,
    Unbound,
    Logical(Vec<bool>),
    Integer(Vec<i32>),
    Double(Vec<f64>),
    Character(Vec<String>),
    List(Vec<Node>),
    Environment {
        id: u32,
        bindings: Vec<(String, Node)>,
        parent: Option<Box<Node>>,
    },
    EnvironmentRef(u32),
    Named(EnvKind),
    Promise {
        expr: Expr,
        env: Option<Box<Node>>,
        value: Option<Box<Node>>,
    },
    Closure {
        formals: Vec<String>,
        body: Expr,
        env: Box<Node>,
    },
    Language(Expr),
    Connection {
        id: u32,
        description: String,
        class: String,
    },
}

/// MessagePack codec built on `rmp-serde`.
#[derive(Debug, Default, Clone)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    pub fn new() -> Self {
        MsgPackCodec
    }
}

impl SerializationCodec for MsgPackCodec {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let node = Encoder::default().node(value);
        Ok(rmp_serde::to_vec(&node)?)
    }

    fn unserialize(&self, frames: &dyn FrameAccess, bytes: &[u8]) -> Result<Value, CodecError> {
        let node: Node = rmp_serde::from_slice(bytes)?;
        Decoder {
            frames,
            envs: HashMap::new(),
        }
        .value(node)
    }

    fn serialize_expr(&self, expr: &Expr) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec(expr)?)
    }

    fn unserialize_expr(&self, bytes: &[u8]) -> Result<Expr, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[derive(Default)]
struct Encoder {
    // object address -> id; the graph being encoded keeps every entry alive
    envs: HashMap<usize, u32>,
}

impl Encoder {
    fn node(&mut self, value: &Value) -> Node {
        let item = match value.body() {
            Body::Null => Item::Null,
            Body::Unbound => Item::Unbound,
            Body::Vector(v) => match &*v.read() {
                Vector::Logical(d) => Item::Logical(d.clone()),
                Vector::Integer(d) => Item::Integer(d.clone()),
                Vector::Double(d) => Item::Double(d.clone()),
                Vector::Character(d) => Item::Character(d.clone()),
            },
            Body::List(items) => {
                let items = items.read().clone();
                Item::List(items.iter().map(|item| self.node(item)).collect())
            }
            Body::Environment(frame) => {
                if !frame.kind().is_local() {
                    return Node {
                        item: Item::Named(frame.kind().clone()),
                        attributes: Vec::new(),
                    };
                }
                if let Some(&id) = self.envs.get(&value.addr()) {
                    return Node {
                        item: Item::EnvironmentRef(id),
                        attributes: Vec::new(),
                    };
                }
                let id = self.envs.len() as u32;
                self.envs.insert(value.addr(), id);
                let bindings = frame
                    .bindings()
                    .iter()
                    .map(|(name, v)| (name.clone(), self.node(v)))
                    .collect();
                let parent = frame.parent().map(|p| Box::new(self.node(&p)));
                Item::Environment { id, bindings, parent }
            }
            Body::Promise(p) => Item::Promise {
                expr: p.expr().clone(),
                env: p.env().map(|e| Box::new(self.node(e))),
                value: p.value().map(|v| Box::new(self.node(&v))),
            },
            Body::Closure(c) => Item::Closure {
                formals: c.formals.clone(),
                body: c.body.clone(),
                env: Box::new(self.node(&c.env)),
            },
            Body::Language(e) => Item::Language(e.clone()),
            Body::Connection(c) => Item::Connection {
                id: c.id,
                description: c.description.clone(),
                class: c.class.clone(),
            },
        };
        let attributes = value
            .attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .map(|(name, v)| (name.to_string(), self.node(v)))
                    .collect()
            })
            .unwrap_or_default();
        Node { item, attributes }
    }
}

struct Decoder<'a> {
    frames: &'a dyn FrameAccess,
    envs: HashMap<u32, Value>,
}

impl Decoder<'_> {
    fn well_known(&self, kind: &EnvKind) -> Result<Value, CodecError> {
        self.frames
            .well_known(kind)
            .ok_or_else(|| CodecError::UnknownEnvironment(kind.clone()))
    }

    fn value(&mut self, node: Node) -> Result<Value, CodecError> {
        let value = match node.item {
            Item::Null => return Ok(Value::null()),
            Item::Unbound => return Ok(Value::unbound()),
            Item::Logical(d) => Value::logical(d),
            Item::Integer(d) => Value::integer(d),
            Item::Double(d) => Value::double(d),
            Item::Character(d) => Value::character(d),
            Item::List(items) => Value::list(
                items
                    .into_iter()
                    .map(|item| self.value(item))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Item::Environment { id, bindings, parent } => {
                // register before decoding bindings so self references resolve
                let empty = self.well_known(&EnvKind::Empty)?;
                let env = self.frames.new_env(&empty);
                self.envs.insert(id, env.clone());
                for (name, binding) in bindings {
                    let v = self.value(binding)?;
                    self.frames.define(&env, &name, v);
                }
                if let Some(parent) = parent {
                    let parent = self.value(*parent)?;
                    self.frames.set_parent(&env, &parent);
                }
                env
            }
            Item::EnvironmentRef(id) => {
                return self.envs.get(&id).cloned().ok_or(CodecError::DanglingReference(id));
            }
            Item::Named(kind) => return self.well_known(&kind),
            Item::Promise { expr, env, value } => {
                let env = env.map(|e| self.value(*e)).transpose()?;
                let value = value.map(|v| self.value(*v)).transpose()?;
                Value::promise_from_parts(expr, env, value)
            }
            Item::Closure { formals, body, env } => {
                let env = self.value(*env)?;
                Value::closure(formals, body, env)
            }
            Item::Language(e) => Value::language(e),
            Item::Connection { id, description, class } => Value::connection(id, &description, &class),
        };
        if !node.attributes.is_empty() {
            let attributes = node
                .attributes
                .into_iter()
                .map(|(name, n)| Ok((name, self.value(n)?)))
                .collect::<Result<Attributes, CodecError>>()?;
            value.init_attributes(Some(attributes));
        }
        Ok(value)
    }
}

use std::collections::HashMap;

use crate::context::{Context, FrameAccess};
use crate::error::ChannelError;
use crate::transfer::{TransferAttributes, Transferable};
use crate::value::{Attributes, Body, Promise, Value, ValueKind};

/// Send-side conversion of one message.
///
/// Environments are remembered by identity for the lifetime of the preparer,
/// so an environment reachable along several paths (or from itself) is
/// captured once and referenced afterwards.
pub struct Preparer<'a> {
    ctx: &'a Context,
    envs: HashMap<usize, (u32, Value)>,
}

impl<'a> Preparer<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Preparer {
            ctx,
            envs: HashMap::new(),
        }
    }

    pub fn prepare(&mut self, value: &Value) -> Result<Transferable, ChannelError> {
        match value.body() {
            Body::List(_) => self.list(value),
            Body::Environment(frame) if frame.kind().is_local() => self.environment(value),
            Body::Promise(promise) => self.promise(promise),
            _ if value.kind().needs_serialization() => self.opaque(value),
            _ => self.structural(value),
        }
    }

    /// Converts an attribute mapping. The flag is true when every attribute
    /// value came back as itself.
    fn attributes(&mut self, attributes: Option<Attributes>) -> Result<(Option<TransferAttributes>, bool), ChannelError> {
        let Some(attributes) = attributes else {
            return Ok((None, true));
        };
        let mut unchanged = true;
        let mut converted = Vec::with_capacity(attributes.len());
        for (name, value) in attributes.iter() {
            let t = self.prepare(value)?;
            unchanged &= t.is_plain(value);
            converted.push((name.to_string(), t));
        }
        Ok((Some(converted), unchanged))
    }

    fn list(&mut self, list: &Value) -> Result<Transferable, ChannelError> {
        let elements = list.list_elements().unwrap_or_default();
        let mut items = Vec::with_capacity(elements.len());
        let mut unchanged = true;
        for element in &elements {
            let t = self.prepare(element)?;
            unchanged &= t.is_plain(element);
            items.push(t);
        }
        let (attributes, attributes_unchanged) = self.attributes(list.attributes())?;

        if unchanged && attributes_unchanged {
            list.make_shared_permanent();
            return Ok(Transferable::Plain(list.clone()));
        }
        Ok(Transferable::List {
            shell: list.shallow_copy_without_attributes(),
            items,
            attributes,
        })
    }

    fn environment(&mut self, env: &Value) -> Result<Transferable, ChannelError> {
        if let Some((id, _)) = self.envs.get(&env.addr()) {
            return Ok(Transferable::EnvRef(*id));
        }
        let id = self.envs.len() as u32;
        self.envs.insert(env.addr(), (id, env.clone()));

        let mut bindings = Vec::new();
        for (name, value) in self.ctx.bindings(env) {
            bindings.push((name, self.prepare(&value)?));
        }
        let parent = match env.frame().and_then(|f| f.parent()) {
            Some(parent) => Some(Box::new(self.prepare(&parent)?)),
            None => None,
        };
        let (attributes, _) = self.attributes(env.attributes())?;

        Ok(Transferable::Env {
            id,
            bindings,
            parent,
            attributes,
        })
    }

    fn promise(&mut self, promise: &Promise) -> Result<Transferable, ChannelError> {
        let expr = self
            .ctx
            .codec()
            .serialize_expr(promise.expr())
            .map_err(|source| ChannelError::Serialization {
                kind: ValueKind::Promise,
                source,
            })?;

        if let Some(value) = promise.value() {
            return Ok(Transferable::Promise {
                env: None,
                value: Some(Box::new(self.prepare(&value)?)),
                expr,
            });
        }
        let env = promise.env().cloned().unwrap_or_else(|| self.ctx.global_env());
        Ok(Transferable::Promise {
            env: Some(Box::new(self.prepare(&env)?)),
            value: None,
            expr,
        })
    }

    /// Encodes the value without its attributes, which are converted
    /// structurally instead.
    fn opaque(&mut self, value: &Value) -> Result<Transferable, ChannelError> {
        let codec = self.ctx.codec();
        let (blob, original) = if value.is_shared() {
            // readers in other contexts may be looking at the header
            let bare = value.shallow_copy_without_attributes();
            (codec.serialize(&bare), value.attributes())
        } else {
            let detached = value.take_attributes();
            let blob = codec.serialize(value);
            value.init_attributes(detached.clone());
            (blob, detached)
        };
        let blob = blob.map_err(|source| ChannelError::Serialization {
            kind: value.kind(),
            source,
        })?;
        let (attributes, _) = self.attributes(original)?;

        Ok(Transferable::Opaque {
            kind: value.kind(),
            blob,
            attributes,
        })
    }

    fn structural(&mut self, value: &Value) -> Result<Transferable, ChannelError> {
        value.make_shared_permanent();
        match self.attributes(value.attributes())? {
            (Some(attributes), false) => Ok(Transferable::Attributed {
                base: Box::new(Transferable::Plain(value.shallow_copy_without_attributes())),
                attributes,
            }),
            _ => Ok(Transferable::Plain(value.clone())),
        }
    }
}

/// Prepares one message sent from `ctx`.
pub fn prepare(ctx: &Context, value: &Value) -> Result<Transferable, ChannelError> {
    Preparer::new(ctx).prepare(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Expr;

    #[test]
    fn shared_scalar_is_passed_through() {
        let ctx = Context::new("sender");
        let v = Value::double(vec![1.0, 2.0]);
        let t = prepare(&ctx, &v).unwrap();
        assert!(t.is_plain(&v));
        assert!(v.is_shared());
    }

    #[test]
    fn list_of_plain_values_is_shared_whole() {
        let ctx = Context::new("sender");
        let list = Value::list(vec![Value::int(1), Value::string("a")]);
        let t = prepare(&ctx, &list).unwrap();
        assert!(t.is_plain(&list));
        assert!(list.is_shared());
    }

    #[test]
    fn list_holding_a_closure_is_copied() {
        let ctx = Context::new("sender");
        let f = Value::closure(vec![], Expr::null(), ctx.global_env());
        let list = Value::list(vec![Value::int(1), f]);

        match prepare(&ctx, &list).unwrap() {
            Transferable::List { shell, items, attributes } => {
                assert!(!shell.ptr_eq(&list));
                assert!(!shell.is_shared());
                assert_eq!(items.len(), 2);
                assert_eq!(items[1].describe(), "opaque");
                assert!(attributes.is_none());
            }
            other => panic!("expected list, got {}", other.describe()),
        }
        assert!(!list.is_shared());
    }

    #[test]
    fn vector_with_closure_attribute_gets_a_private_base() {
        let ctx = Context::new("sender");
        let mut v = Value::int(5);
        v.set_attr("hook", Value::closure(vec![], Expr::null(), ctx.global_env()));

        match prepare(&ctx, &v).unwrap() {
            Transferable::Attributed { base, attributes } => {
                match *base {
                    Transferable::Plain(ref b) => {
                        assert!(!b.ptr_eq(&v));
                        assert!(!b.has_attributes());
                    }
                    ref other => panic!("expected plain base, got {}", other.describe()),
                }
                assert_eq!(attributes[0].0, "hook");
            }
            other => panic!("expected attributed, got {}", other.describe()),
        }
        assert!(v.is_shared());
    }

    #[test]
    fn opaque_value_keeps_its_attributes() {
        let ctx = Context::new("sender");
        let mut f = Value::closure(vec!["x".into()], Expr::symbol("x"), ctx.global_env());
        f.set_attr("srcref", Value::string("function(x) x"));

        match prepare(&ctx, &f).unwrap() {
            Transferable::Opaque { kind, attributes, .. } => {
                assert_eq!(kind, ValueKind::Closure);
                assert_eq!(attributes.unwrap()[0].0, "srcref");
            }
            other => panic!("expected opaque, got {}", other.describe()),
        }
        assert!(Value::identical(&f.attr("srcref").unwrap(), &Value::string("function(x) x")));
    }

    #[test]
    fn environment_seen_twice_is_referenced() {
        let ctx = Context::new("sender");
        let env = ctx.new_env(&ctx.global_env());
        ctx.define(&env, "self", env.clone());

        match prepare(&ctx, &env).unwrap() {
            Transferable::Env { id, bindings, parent, .. } => {
                assert!(matches!(bindings[0].1, Transferable::EnvRef(r) if r == id));
                assert_eq!(parent.unwrap().describe(), "opaque");
            }
            other => panic!("expected env, got {}", other.describe()),
        }
    }

    #[test]
    fn unevaluated_promise_without_env_captures_global() {
        let ctx = Context::new("sender");
        let p = Value::promise(Expr::symbol("x"), None);
        match prepare(&ctx, &p).unwrap() {
            Transferable::Promise { env, value, expr } => {
                assert_eq!(env.unwrap().describe(), "opaque");
                assert!(value.is_none());
                assert!(!expr.is_empty());
            }
            other => panic!("expected promise, got {}", other.describe()),
        }
    }

    #[test]
    fn forced_promise_is_sent_as_evaluated() {
        let ctx = Context::new("sender");
        let env = ctx.new_env(&ctx.global_env());
        let p = Value::promise(Expr::symbol("x"), Some(env));
        assert!(p.promise_data().unwrap().deliver(Value::int(7)));
        assert!(!p.promise_data().unwrap().deliver(Value::int(8)));

        match prepare(&ctx, &p).unwrap() {
            Transferable::Promise { env, value, .. } => {
                assert!(env.is_none());
                assert_eq!(value.unwrap().describe(), "plain");
            }
            other => panic!("expected promise, got {}", other.describe()),
        }
    }
}

use std::collections::HashMap;

use crate::context::{Context, FrameAccess};
use crate::error::ChannelError;
use crate::parser::{deparse, parse};
use crate::transfer::{TransferAttributes, Transferable};
use crate::value::{Attributes, Value};

/// Receive-side reconstruction of one message in the receiving context.
pub struct Materializer<'a> {
    ctx: &'a Context,
    envs: HashMap<u32, Value>,
}

impl<'a> Materializer<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Materializer {
            ctx,
            envs: HashMap::new(),
        }
    }

    pub fn materialize(&mut self, transferable: Transferable) -> Result<Value, ChannelError> {
        let ctx = self.ctx;
        let (value, attributes) = match transferable {
            Transferable::Plain(value) => (value, None),
            Transferable::List {
                mut shell,
                items,
                attributes,
            } => {
                for (index, item) in items.into_iter().enumerate() {
                    let element = self.materialize(item)?;
                    shell.set_element(index, element).map_err(ChannelError::Transfer)?;
                }
                (shell, attributes)
            }
            Transferable::Env {
                id,
                bindings,
                parent,
                attributes,
            } => {
                let env = ctx.new_env(&ctx.empty_env());
                self.envs.insert(id, env.clone());
                for (name, binding) in bindings {
                    let value = self.materialize(binding)?;
                    ctx.define(&env, &name, value);
                }
                if let Some(parent) = parent {
                    let parent = self.materialize(*parent)?;
                    ctx.set_parent(&env, &parent);
                }
                (env, attributes)
            }
            Transferable::EnvRef(id) => {
                return self
                    .envs
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| ChannelError::Transfer(format!("environment #{} referenced before capture", id)));
            }
            Transferable::Promise { env, value, expr } => {
                let expr = ctx
                    .codec()
                    .unserialize_expr(&expr)
                    .map_err(|e| ChannelError::decode("promise expression", e))?;
                // rebuilt from text so the receiver owns a fresh expression
                let expr = parse(&deparse(&expr)).map_err(|e| ChannelError::decode("promise expression", e.into()))?;
                let env = env.map(|e| self.materialize(*e)).transpose()?;
                let value = value.map(|v| self.materialize(*v)).transpose()?;
                (Value::promise_from_parts(expr, env, value), None)
            }
            Transferable::Opaque { blob, attributes, .. } => {
                let value = ctx
                    .codec()
                    .unserialize(ctx, &blob)
                    .map_err(|e| ChannelError::decode("opaque value", e))?;
                (value, attributes)
            }
            Transferable::Attributed { base, attributes } => (self.materialize(*base)?, Some(attributes)),
        };
        self.attach(value, attributes)
    }

    /// Final pass shared by every variant: converts the attribute mapping and
    /// installs it on the freshly built value.
    fn attach(&mut self, value: Value, attributes: Option<TransferAttributes>) -> Result<Value, ChannelError> {
        let Some(attributes) = attributes else {
            return Ok(value);
        };
        let attributes = attributes
            .into_iter()
            .map(|(name, t)| Ok((name, self.materialize(t)?)))
            .collect::<Result<Attributes, ChannelError>>()?;
        // the receiver's own well-known environments are not ours to relabel
        if value.frame().map_or(false, |f| !f.kind().is_local()) {
            return Ok(value);
        }
        value.init_attributes(Some(attributes));
        Ok(value)
    }
}

/// Materializes one message in the receiving context `ctx`.
pub fn materialize(ctx: &Context, transferable: Transferable) -> Result<Value, ChannelError> {
    Materializer::new(ctx).materialize(transferable)
}

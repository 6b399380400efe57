//! `channel.*` builtins. Ids are the raw signed handles: positive on the side
//! that created the channel, negative on the side that looked it up.

use tracing::trace;

use crate::helpers::{expect_arity, get_handle, get_integer};
use crate::{register_module, values, BuiltinError, Builtins, Session, Value};

fn create(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.create", &args, 1)?;
    let key = get_integer("channel.create", &args, 0)?;
    let handle = session.registry.create(key)?;
    values::handle(handle)
}

fn get(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.get", &args, 1)?;
    let key = get_integer("channel.get", &args, 0)?;
    let handle = session.registry.get(key)?;
    values::handle(handle)
}

fn close(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.close", &args, 1)?;
    let handle = get_handle("channel.close", &args, 0)?;
    session.registry.close(handle)?;
    Ok(values::nil())
}

fn send(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.send", &args, 2)?;
    let handle = get_handle("channel.send", &args, 0)?;
    trace!(context = session.context.name(), kind = %args[1].kind(), "channel.send");
    session.registry.send(&session.context, handle, &args[1])?;
    Ok(values::nil())
}

fn receive(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.receive", &args, 1)?;
    let handle = get_handle("channel.receive", &args, 0)?;
    Ok(session.registry.receive(&session.context, handle)?)
}

/// `NULL` when nothing is waiting.
fn poll(session: &Session, args: Vec<Value>) -> Result<Value, BuiltinError> {
    expect_arity("channel.poll", &args, 1)?;
    let handle = get_handle("channel.poll", &args, 0)?;
    Ok(session
        .registry
        .poll(&session.context, handle)?
        .unwrap_or_else(values::nil))
}

pub fn register_channel_builtins(builtins: &Builtins) -> Vec<String> {
    register_module!(builtins,
        "channel.create" => create,
        "channel.get" => get,
        "channel.close" => close,
        "channel.send" => send,
        "channel.receive" => receive,
        "channel.poll" => poll,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::{ChannelError, ChannelRegistry, Context};

    fn setup() -> (Arc<Builtins>, Session, Session) {
        let builtins = Arc::new(Builtins::new());
        register_channel_builtins(&builtins);
        let registry = Arc::new(ChannelRegistry::new());
        let master = Session::new(Arc::new(Context::new("master")), registry.clone());
        let worker = Session::new(Arc::new(Context::new("worker")), registry);
        (builtins, master, worker)
    }

    fn as_int(v: &Value) -> i64 {
        crate::extract::integer(v).unwrap()
    }

    #[test]
    fn registers_all_channel_functions() {
        let builtins = Builtins::new();
        let names = register_channel_builtins(&builtins);
        assert_eq!(names.len(), 6);
        assert!(builtins.get("channel.poll").is_some());
    }

    #[test]
    fn create_and_get_return_opposite_ids() {
        let (b, master, worker) = setup();
        let id = as_int(&b.call(&master, "channel.create", vec![Value::num(3.0)]).unwrap());
        let peer = as_int(&b.call(&worker, "channel.get", vec![Value::int(3)]).unwrap());
        assert!(id > 0);
        assert_eq!(peer, -id);
    }

    #[test]
    fn message_round_trip_between_sessions() {
        let (b, master, worker) = setup();
        let id = b.call(&master, "channel.create", vec![Value::int(1)]).unwrap();
        let peer = b.call(&worker, "channel.get", vec![Value::int(1)]).unwrap();

        let payload = Value::list(vec![Value::string("job"), Value::double(vec![1.0, 2.0])]);
        b.call(&master, "channel.send", vec![id.clone(), payload.clone()]).unwrap();

        let remote = {
            let (b, worker, peer) = (b.clone(), worker.clone(), peer.clone());
            thread::spawn(move || {
                let got = b.call(&worker, "channel.receive", vec![peer.clone()]).unwrap();
                b.call(&worker, "channel.send", vec![peer, Value::int(got.length() as i32)])
                    .unwrap();
                got
            })
        };
        let got = remote.join().unwrap();
        assert!(Value::identical(&got, &payload));

        let reply = b.call(&master, "channel.receive", vec![id]).unwrap();
        assert!(Value::identical(&reply, &Value::int(2)));
    }

    #[test]
    fn poll_returns_null_when_empty() {
        let (b, master, _) = setup();
        let id = b.call(&master, "channel.create", vec![Value::int(2)]).unwrap();
        assert!(b.call(&master, "channel.poll", vec![id]).unwrap().is_null());
    }

    #[test]
    fn errors_surface_as_channel_errors() {
        let (b, master, _) = setup();
        b.call(&master, "channel.create", vec![Value::int(5)]).unwrap();
        let err = b.call(&master, "channel.create", vec![Value::int(5)]).unwrap_err();
        assert!(matches!(err, BuiltinError::Channel(ChannelError::DuplicateKey(5))));

        let err = b.call(&master, "channel.get", vec![Value::int(6)]).unwrap_err();
        assert!(matches!(err, BuiltinError::Channel(ChannelError::NotFound(_))));

        let err = b.call(&master, "channel.send", vec![Value::int(1)]).unwrap_err();
        assert!(matches!(err, BuiltinError::Argument(_)));

        let err = b.call(&master, "channel.close", vec![Value::num(1.5)]).unwrap_err();
        assert!(matches!(err, BuiltinError::Argument(_)));
    }
}

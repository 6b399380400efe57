use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use ferry_core::transfer::{materialize, prepare};
use ferry_core::{ChannelError, ChannelRegistry, Context, Expr, FrameAccess, Value, ValueKind};

fn ship(from: &Context, to: &Context, value: &Value) -> Value {
    materialize(to, prepare(from, value).unwrap()).unwrap()
}

#[test]
fn round_trip_of_every_shape_is_equivalent_and_unaliased() {
    let master = Context::new("master");
    let worker = Context::new("worker");

    let mut names = Value::double(vec![1.0, 2.5]);
    names.set_attr("names", Value::character(["a", "b"]));
    let nested = Value::list(vec![
        Value::int(1),
        Value::list(vec![Value::string("x"), Value::boolean(true)]),
        names,
        Value::null(),
    ]);

    let copy = ship(&master, &worker, &nested);
    assert!(Value::identical(&copy, &nested));

    let mut mutated = copy.clone();
    mutated.set_element(0, Value::int(99)).unwrap();
    let original_first = nested.list_elements().unwrap()[0].clone();
    assert!(Value::identical(&original_first, &Value::int(1)));
    assert!(!Value::identical(&mutated, &nested));

    let lang = Value::language(Expr::call(Expr::symbol("sum"), vec![Expr::int(1), Expr::double(2.0)]));
    let lang_copy = ship(&master, &worker, &lang);
    assert!(Value::identical(&lang_copy, &lang));
    assert!(!lang_copy.ptr_eq(&lang));

    let conn = Value::connection(3, "data.csv", "file");
    let conn_copy = ship(&master, &worker, &conn);
    assert_eq!(conn_copy.connection_data(), conn.connection_data());
    assert_eq!(conn_copy.kind(), ValueKind::Connection);
}

#[test]
fn list_with_closure_copy_does_not_touch_original() {
    let master = Context::new("master");
    let worker = Context::new("worker");
    let f = Value::closure(vec!["x".into()], Expr::symbol("x"), master.global_env());
    let list = Value::list(vec![Value::int(1), f.clone()]);

    let mut copy = ship(&master, &worker, &list);
    copy.set_element(1, Value::null()).unwrap();
    assert!(list.list_elements().unwrap()[1].ptr_eq(&f));
}

#[test]
fn preparing_a_shared_value_twice_returns_the_same_reference() {
    let ctx = Context::new("master");
    let v = Value::list(vec![Value::int(1), Value::num(2.0)]);

    let first = prepare(&ctx, &v).unwrap();
    let second = prepare(&ctx, &v).unwrap();
    assert!(first.is_plain(&v));
    assert!(second.is_plain(&v));
    assert!(v.is_shared());
}

#[test]
fn concurrent_create_with_same_key_has_one_winner() {
    for _ in 0..20 {
        let registry = Arc::new(ChannelRegistry::new());
        let barrier = Arc::new(Barrier::new(2));
        let racers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.create(5)
                })
            })
            .collect();
        let results: Vec<_> = racers.into_iter().map(|r| r.join().unwrap()).collect();
        let won = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(ChannelError::DuplicateKey(5))))
            .count();
        assert_eq!((won, duplicates), (1, 1));
        assert_eq!(registry.live_channels(), 1);
    }
}

#[test]
fn capacity_one_backpressure() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = registry.create(1).unwrap();
    let peer = registry.get(1).unwrap();

    let sender = {
        let registry = registry.clone();
        thread::spawn(move || {
            let ctx = Context::new("a");
            registry.send(&ctx, handle, &Value::string("M1")).unwrap();
            registry.send(&ctx, handle, &Value::string("M2")).unwrap();
        })
    };

    let b = Context::new("b");
    thread::sleep(Duration::from_millis(100));
    // M1 is queued and M2 is still waiting for the slot
    assert!(!sender.is_finished());

    let first = registry.receive(&b, peer).unwrap();
    assert!(Value::identical(&first, &Value::string("M1")));
    let second = registry.receive(&b, peer).unwrap();
    assert!(Value::identical(&second, &Value::string("M2")));
    sender.join().unwrap();
}

#[test]
fn directions_do_not_mix() {
    let registry = ChannelRegistry::new();
    let (a, b) = (Context::new("a"), Context::new("b"));
    let handle = registry.create(3).unwrap();
    let peer = registry.get(3).unwrap();

    registry.send(&a, handle, &Value::int(1)).unwrap();
    registry.send(&b, peer, &Value::int(2)).unwrap();
    assert!(registry.poll(&a, handle).unwrap().is_some_and(|v| Value::identical(&v, &Value::int(2))));
    assert!(registry.poll(&b, peer).unwrap().is_some_and(|v| Value::identical(&v, &Value::int(1))));
}

#[test]
fn poll_on_empty_channel_returns_none() {
    let registry = ChannelRegistry::new();
    let ctx = Context::new("a");
    let handle = registry.create(9).unwrap();
    assert!(registry.poll(&ctx, handle).unwrap().is_none());
    assert!(registry.poll(&ctx, handle.peer()).unwrap().is_none());
}

#[test]
fn double_close_succeeds_and_later_use_fails() {
    let registry = ChannelRegistry::new();
    let ctx = Context::new("a");
    let handle = registry.create(2).unwrap();
    let peer = registry.get(2).unwrap();

    registry.close(handle).unwrap();
    registry.close(handle).unwrap();
    registry.close(peer).unwrap();

    assert!(matches!(registry.send(&ctx, handle, &Value::int(1)), Err(ChannelError::NotFound(_))));
    assert!(matches!(registry.receive(&ctx, peer), Err(ChannelError::NotFound(_))));
    assert!(matches!(registry.poll(&ctx, peer), Err(ChannelError::NotFound(_))));
    assert!(matches!(registry.get(2), Err(ChannelError::NotFound(_))));
}

#[test]
fn close_wakes_blocked_receiver() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = registry.create(4).unwrap();
    let peer = registry.get(4).unwrap();

    let receiver = {
        let registry = registry.clone();
        thread::spawn(move || registry.receive(&Context::new("b"), peer))
    };
    thread::sleep(Duration::from_millis(50));
    registry.close(handle).unwrap();
    assert!(matches!(receiver.join().unwrap(), Err(ChannelError::NotFound(_))));
}

#[test]
fn growth_keeps_every_channel_reachable() {
    let registry = ChannelRegistry::new();
    assert_eq!(registry.capacity(), 4);
    let ctx = Context::new("a");

    let created: Vec<_> = (1..=10).map(|key| (key, registry.create(key).unwrap())).collect();
    assert!(registry.capacity() >= 11);

    for (key, handle) in &created {
        let found = registry.get(*key).unwrap();
        assert_eq!(found.slot, handle.slot);
        assert_eq!(registry.channel(found).unwrap().key(), *key);
    }
    let mut slots: Vec<_> = created.iter().map(|(_, h)| h.slot).collect();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), 10);

    for (key, handle) in &created {
        registry.send(&ctx, *handle, &Value::int(*key as i32)).unwrap();
    }
    for (key, _) in &created {
        let peer = registry.get(*key).unwrap();
        let got = registry.poll(&ctx, peer).unwrap().unwrap();
        assert!(Value::identical(&got, &Value::int(*key as i32)));
    }
}

#[test]
fn three_level_environment_chain_is_rebuilt() {
    let registry = ChannelRegistry::new();
    let (a, b) = (Context::new("a"), Context::new("b"));
    let handle = registry.create(8).unwrap();
    let peer = registry.get(8).unwrap();

    let outer = a.new_env(&a.global_env());
    a.define(&outer, "level", Value::int(1));
    a.define(&outer, "outer_only", Value::string("o"));
    let middle = a.new_env(&outer);
    a.define(&middle, "level", Value::int(2));
    let inner = a.new_env(&middle);
    a.define(&inner, "level", Value::int(3));
    a.define(&inner, "data", Value::double(vec![0.5, 1.5]));

    registry.send(&a, handle, &inner).unwrap();
    let got = registry.receive(&b, peer).unwrap();

    let mut env = got.clone();
    for expected in [3, 2, 1] {
        let level = b.get_binding(&env, "level").unwrap();
        assert!(Value::identical(&level, &Value::int(expected)));
        env = env.frame().unwrap().parent().unwrap();
    }
    assert!(env.ptr_eq(&b.global_env()));
    assert!(Value::identical(&b.lookup(&got, "outer_only").unwrap(), &Value::string("o")));
    let names: Vec<_> = b.bindings(&got).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["level", "data"]);
    assert!(!got.ptr_eq(&inner));
}

#[test]
fn cyclic_environments_survive_transfer() {
    let (a, b) = (Context::new("a"), Context::new("b"));
    let left = a.new_env(&a.global_env());
    let right = a.new_env(&left);
    a.define(&left, "peer", right.clone());
    a.define(&right, "peer", left.clone());

    let got = ship(&a, &b, &left);
    let got_right = b.get_binding(&got, "peer").unwrap();
    let back = b.get_binding(&got_right, "peer").unwrap();
    assert!(back.ptr_eq(&got));
    assert!(got_right.frame().unwrap().parent().unwrap().ptr_eq(&got));
}

#[test]
fn interrupt_fails_blocked_receive_with_retryable_error() {
    let registry = Arc::new(ChannelRegistry::new());
    let handle = registry.create(6).unwrap();
    let ctx = Arc::new(Context::new("worker"));
    let interrupter = ctx.interrupter();

    let receiver = {
        let registry = registry.clone();
        let ctx = ctx.clone();
        thread::spawn(move || registry.receive(&ctx, handle.peer()))
    };
    thread::sleep(Duration::from_millis(50));
    interrupter.interrupt();

    let err = receiver.join().unwrap().unwrap_err();
    assert!(matches!(err, ChannelError::Interrupted { op: "receive" }));
    assert!(err.is_retryable());

    // the channel is still usable afterwards
    registry.send(&Context::new("master"), handle, &Value::int(1)).unwrap();
    assert!(registry.receive(&ctx, handle.peer()).is_ok());
}

#[test]
fn interrupt_reaches_every_blocked_thread_of_a_context() {
    let registry = Arc::new(ChannelRegistry::new());
    let (first, second) = (registry.create(7).unwrap(), registry.create(8).unwrap());
    let ctx = Arc::new(Context::new("worker"));

    let (done, results) = mpsc::channel();
    let spawn_receiver = |handle: ferry_core::ChannelHandle| {
        let (registry, ctx, done) = (registry.clone(), ctx.clone(), done.clone());
        thread::spawn(move || done.send((handle, registry.receive(&ctx, handle.peer()))).unwrap())
    };
    let t1 = spawn_receiver(first);
    let t2 = spawn_receiver(second);
    while ctx.interrupt().waiters() < 2 {
        thread::sleep(Duration::from_millis(5));
    }

    registry.send(&Context::new("master"), second, &Value::int(2)).unwrap();
    let (handle, result) = results.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(handle, second);
    assert!(result.is_ok());
    t2.join().unwrap();

    ctx.interrupter().interrupt();
    let (handle, result) = results
        .recv_timeout(Duration::from_secs(5))
        .expect("blocked receive was not woken by the interrupt");
    assert_eq!(handle, first);
    assert!(matches!(result, Err(ChannelError::Interrupted { op: "receive" })));
    t1.join().unwrap();
}

#[test]
fn missing_package_on_receiver_is_reported() {
    let registry = ChannelRegistry::new();
    let (a, b) = (Context::new("a"), Context::new("b"));
    a.attach_package("plotting");
    let handle = registry.create(12).unwrap();

    let env = a.new_env(&a.package_env("plotting").unwrap());
    registry.send(&a, handle, &env).unwrap();
    let err = registry.receive(&b, handle.peer()).unwrap_err();
    assert_eq!(err.code(), "CHANNEL_PASS_BY_REFERENCE");
}

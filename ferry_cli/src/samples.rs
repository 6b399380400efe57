use ferry_core::value::Vector;
use ferry_core::{Context, Expr, FrameAccess, Value};

/// A message of a different shape for each round.
pub fn message(ctx: &Context, worker: usize, round: usize) -> Value {
    match round % 6 {
        0 => Value::integer((0..=round as i32).collect()),
        1 => {
            let mut v = Value::double(vec![worker as f64, round as f64]);
            v.set_attr("names", Value::character(["worker", "round"]));
            v
        }
        2 => Value::list(vec![
            Value::string("task"),
            Value::list(vec![Value::int(worker as i32), Value::boolean(round % 2 == 0)]),
        ]),
        3 => {
            let env = ctx.new_env(&ctx.global_env());
            ctx.define(&env, "scale", Value::num(round as f64));
            Value::closure(
                vec!["x".into()],
                Expr::call(Expr::symbol("*"), vec![Expr::symbol("x"), Expr::symbol("scale")]),
                env,
            )
        }
        4 => {
            let outer = ctx.new_env(&ctx.global_env());
            ctx.define(&outer, "depth", Value::int(1));
            let inner = ctx.new_env(&outer);
            ctx.define(&inner, "depth", Value::int(2));
            ctx.define(&inner, "round", Value::int(round as i32));
            inner
        }
        _ => Value::promise(
            Expr::call(Expr::symbol("+"), vec![Expr::symbol("round"), Expr::int(1)]),
            None,
        ),
    }
}

/// One-line description of a received value for the console.
pub fn summary(ctx: &Context, value: &Value) -> String {
    if let Some(frame) = value.frame() {
        let mut depth = 0;
        let mut current = Some(value.clone());
        while let Some(env) = current.filter(|e| e.frame().map_or(false, |f| f.kind().is_local())) {
            depth += 1;
            current = env.frame().and_then(|f| f.parent());
        }
        return format!("environment [{}] depth {}", frame.names().join(", "), depth);
    }
    if let Some(closure) = value.closure_data() {
        let captured: Vec<_> = ctx.bindings(&closure.env).into_iter().map(|(n, _)| n).collect();
        return format!("closure ({}) capturing [{}]", closure.formals.join(", "), captured.join(", "));
    }
    if let Some(promise) = value.promise_data() {
        return format!(
            "promise {} evaluated={}",
            ferry_core::parser::deparse(promise.expr()),
            promise.is_evaluated()
        );
    }
    let body = match value.vector_data() {
        Some(Vector::Integer(v)) => format!("{:?}", v),
        Some(Vector::Double(v)) => format!("{:?}", v),
        Some(Vector::Logical(v)) => format!("{:?}", v),
        Some(Vector::Character(v)) => format!("{:?}", v),
        None => format!("length {}", value.length()),
    };
    match value.attributes() {
        Some(attrs) => format!("{} {} attrs [{}]", value.kind(), body, attrs.names().join(", ")),
        None => format!("{} {}", value.kind(), body),
    }
}

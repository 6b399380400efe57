use serde::{Deserialize, Serialize};

/// Literal that may appear inside an unevaluated expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Logical(bool),
    Integer(i32),
    Double(f64),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

/// Unevaluated language object. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Symbol(String),
    Constant(Constant),
    Call {
        function: Box<Expr>,
        args: Vec<Arg>,
    },
}

impl Expr {
    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol(name.into())
    }

    pub fn int(n: i32) -> Self {
        Expr::Constant(Constant::Integer(n))
    }

    pub fn double(n: f64) -> Self {
        Expr::Constant(Constant::Double(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Constant(Constant::Str(s.into()))
    }

    pub fn logical(b: bool) -> Self {
        Expr::Constant(Constant::Logical(b))
    }

    pub fn null() -> Self {
        Expr::Constant(Constant::Null)
    }

    /// Call with positional arguments only.
    pub fn call(function: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            function: Box::new(function),
            args: args.into_iter().map(|value| Arg { name: None, value }).collect(),
        }
    }

    pub fn call_named(function: Expr, args: Vec<(Option<&str>, Expr)>) -> Self {
        Expr::Call {
            function: Box::new(function),
            args: args
                .into_iter()
                .map(|(name, value)| Arg { name: name.map(str::to_string), value })
                .collect(),
        }
    }
}

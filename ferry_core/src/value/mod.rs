mod attributes;
mod expr;
mod frame;
mod object;

pub use attributes::*;
pub use expr::*;
pub use frame::*;
pub use object::*;

pub(crate) use object::Body;

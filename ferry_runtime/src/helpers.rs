use ferry_core::{ChannelHandle, Value};

use crate::{extract, BuiltinError};

pub fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<(), BuiltinError> {
    if args.len() != expected {
        Err(BuiltinError::Argument(format!(
            "{}: expected {} arguments, got {}",
            name,
            expected,
            args.len()
        )))
    } else {
        Ok(())
    }
}

pub fn get_integer(name: &str, args: &[Value], index: usize) -> Result<i64, BuiltinError> {
    let arg = args
        .get(index)
        .ok_or_else(|| BuiltinError::Argument(format!("{}: missing argument {} (expected integer)", name, index)))?;
    extract::integer(arg).map_err(|e| BuiltinError::Argument(format!("{}: argument {}: {}", name, index, e)))
}

pub fn get_handle(name: &str, args: &[Value], index: usize) -> Result<ChannelHandle, BuiltinError> {
    let arg = args
        .get(index)
        .ok_or_else(|| BuiltinError::Argument(format!("{}: missing argument {} (expected channel id)", name, index)))?;
    extract::handle(arg).map_err(|e| BuiltinError::Argument(format!("{}: argument {}: {}", name, index, e)))
}

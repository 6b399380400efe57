pub mod channel;
pub mod codec;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod parser;
pub mod registry;
pub mod telemetry;
pub mod transfer;
pub mod value;

pub use channel::{ChannelHandle, Side};
pub use context::{Context, FrameAccess};
pub use error::ChannelError;
pub use registry::{ChannelRegistry, RegistryConfig};
pub use transfer::Transferable;
pub use value::{EnvKind, Expr, Value, ValueKind};

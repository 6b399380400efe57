use serde::{Deserialize, Serialize};

/// One channel operation as observed by the registry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TelemetryEvent {
    pub op: String,
    pub handle: Option<i64>,
    pub key: Option<i64>,
    /// Variant of the transferable that moved, for send/receive/poll.
    pub transferable: Option<String>,
    pub duration_us: u128,
    pub ok: bool,
}

impl TelemetryEvent {
    pub fn new(op: &str) -> Self {
        TelemetryEvent {
            op: op.to_string(),
            handle: None,
            key: None,
            transferable: None,
            duration_us: 0,
            ok: true,
        }
    }

    pub fn handle(mut self, raw: i64) -> Self {
        self.handle = Some(raw);
        self
    }

    pub fn key(mut self, key: i64) -> Self {
        self.key = Some(key);
        self
    }

    pub fn transferable(mut self, variant: &str) -> Self {
        self.transferable = Some(variant.to_string());
        self
    }
}

pub type TelemetrySink = Box<dyn Fn(TelemetryEvent) + Send + Sync>;

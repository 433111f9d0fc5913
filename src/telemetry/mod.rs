//! OTLP telemetry: wire shapes, normalized records, and the decoder that
//! turns one into the other.

pub mod decode;
pub mod encode;
pub mod otlp;
pub mod types;

pub use decode::{decode, decode_at};
pub use encode::encode;
pub use types::{
    Attributes, Kind, LogRecord, MetricPoint, Payload, Scalar, Severity, Span, SpanStatus,
    TelemetryEnvelope,
};

mod bytes_value;
mod value;
mod wire;

pub use bytes_value::BytesValue;
pub use value::{Sentinel, Value};
pub use wire::{map_to_json, FieldOperation, WireKind, WireMap, WireValue};

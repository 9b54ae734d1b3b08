//! The single translation table between application sentinels and the
//! backend's native field operations.

use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::value::{FieldOperation, Sentinel, Value, WireKind, WireValue};

use super::Marshaller;

pub(crate) fn to_operation(
    marshaller: &Marshaller,
    sentinel: &Sentinel,
) -> DocstoreResult<FieldOperation> {
    let operation = match sentinel {
        Sentinel::Delete => FieldOperation::Delete,
        Sentinel::ServerTimestamp => FieldOperation::ServerTimestamp,
        Sentinel::Increment(amount) => {
            let encoded = marshaller.encode_operand(amount, sentinel)?;
            match encoded.kind() {
                WireKind::Integer(_) | WireKind::Double(_) => {
                    FieldOperation::Increment(Box::new(encoded))
                }
                _ => {
                    return Err(invalid_argument(format!(
                        "increment() requires a numeric amount, got {amount:?}"
                    )))
                }
            }
        }
        Sentinel::ArrayUnion(values) => {
            FieldOperation::ArrayUnion(encode_elements(marshaller, values, sentinel)?)
        }
        Sentinel::ArrayRemove(values) => {
            FieldOperation::ArrayRemove(encode_elements(marshaller, values, sentinel)?)
        }
    };
    Ok(operation)
}

fn encode_elements(
    marshaller: &Marshaller,
    values: &[Value],
    sentinel: &Sentinel,
) -> DocstoreResult<Vec<WireValue>> {
    values
        .iter()
        .map(|value| marshaller.encode_operand(value, sentinel))
        .collect()
}

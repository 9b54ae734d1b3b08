//! Flattening of nested or path-based partial updates into the dotted field
//! paths a backend update mutation expects.

mod builder;
mod compiler;

pub use builder::{field, FieldSetter, FieldUpdate, UpdateBuilder, UpdateData};
pub use compiler::{compile_update, CompiledUpdate, UpdateFields};

//! Runtime capability flag supplied once when a [`Docstore`](crate::docstore::Docstore)
//! is constructed and checked on every mutation.

use serde::Deserialize;

use crate::docstore::error::{environment_mismatch, DocstoreResult};
use crate::docstore::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Trusted process (admin credentials). Literal dates are accepted.
    #[default]
    Server,
    /// Untrusted client. Clock-derived values must come from the backend.
    Client,
}

impl RuntimeEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeEnvironment::Server => "server",
            RuntimeEnvironment::Client => "client",
        }
    }

    /// Fails when `operation` is gated to a different environment.
    pub fn ensure(&self, required: RuntimeEnvironment, operation: &str) -> DocstoreResult<()> {
        if *self != required {
            return Err(environment_mismatch(format!(
                "{operation} is only available in the {} environment (current: {})",
                required.as_str(),
                self.as_str()
            )));
        }
        Ok(())
    }

    /// Checks that a write payload only uses values legal in this environment.
    pub fn check_write(&self, value: &Value) -> DocstoreResult<()> {
        match value {
            Value::Date(_) => self.ensure(
                RuntimeEnvironment::Server,
                "Writing a literal date (use Value::server_timestamp())",
            ),
            Value::Array(values) => values.iter().try_for_each(|value| self.check_write(value)),
            Value::Map(fields) => fields.values().try_for_each(|value| self.check_write(value)),
            _ => Ok(()),
        }
    }
}

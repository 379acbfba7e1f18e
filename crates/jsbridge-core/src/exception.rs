//! Extraction of pending engine exceptions
//!
//! When the engine reports `rquickjs::Error::Exception` the thrown value sits
//! in the context until it is caught. [`Thrown::take`] clears it and keeps the
//! parts the diagnostic sink needs.

use rquickjs::{Ctx, FromJs, Object, Value};

use crate::error::{BridgeError, ErrorReport};

/// Filename used when reporting engine out-of-memory through the error channel
pub const FATAL_FILENAME: &str = "__fatal__";

/// Message reported alongside [`FATAL_FILENAME`]
pub const OUT_OF_MEMORY_MESSAGE: &str = "engine ran out of memory";

/// A thrown script value reduced to name, message and line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    pub name: Option<String>,
    pub message: String,
    pub line: Option<u32>,
}

impl Thrown {
    /// Catch and clear the pending exception on `ctx`
    pub fn take(ctx: &Ctx<'_>) -> Self {
        let value = ctx.catch();
        Self::from_value(&value)
    }

    /// Describe an arbitrary thrown value
    pub fn from_value(value: &Value<'_>) -> Self {
        if let Some(obj) = value.as_object() {
            let name = read_property::<String>(obj, "name");
            let message = read_property::<String>(obj, "message").unwrap_or_default();
            let line = read_property::<u32>(obj, "lineNumber").or_else(|| {
                read_property::<String>(obj, "stack").and_then(|stack| line_from_stack(&stack))
            });
            return Self {
                name,
                message,
                line,
            };
        }

        let message = if let Some(s) = value.as_string() {
            s.to_string().unwrap_or_default()
        } else if let Some(n) = value.as_number() {
            n.to_string()
        } else if let Some(b) = value.as_bool() {
            b.to_string()
        } else if value.is_null() {
            "null".to_string()
        } else {
            "uncaught exception".to_string()
        };

        Self {
            name: None,
            message,
            line: None,
        }
    }

    /// `InternalError: out of memory` is how the engine signals heap exhaustion
    pub fn is_out_of_memory(&self) -> bool {
        self.name.as_deref() == Some("InternalError") && self.message == "out of memory"
    }

    /// Message in `Name: message` form, e.g. `Error: BANG`
    pub fn display_message(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{}: {}", name, self.message),
            _ => self.message.clone(),
        }
    }

    pub fn into_report(self, filename: &str) -> ErrorReport {
        ErrorReport::new(filename, self.line.unwrap_or(0), self.display_message())
    }

    pub fn into_error(self, filename: &str) -> BridgeError {
        if self.is_out_of_memory() {
            BridgeError::OutOfMemory
        } else {
            BridgeError::Script(self.into_report(filename))
        }
    }
}

/// Read an optional property of a thrown object.
///
/// Getters can throw; the new exception is cleared so it does not stay
/// pending on the context.
fn read_property<'js, T: FromJs<'js>>(obj: &Object<'js>, key: &str) -> Option<T> {
    match obj.get::<_, Option<T>>(key) {
        Ok(value) => value,
        Err(rquickjs::Error::Exception) => {
            obj.ctx().catch();
            None
        }
        Err(_) => None,
    }
}

/// Pull the first `file:line[:col]` location out of a stack trace
fn line_from_stack(stack: &str) -> Option<u32> {
    stack.lines().find_map(|frame| {
        let (_, location) = frame.rsplit_once('(')?;
        let location = location.trim_end().trim_end_matches(')');
        let mut parts = location.rsplit(':');
        let last = parts.next()?;
        match parts.next() {
            Some(prev) if parts.next().is_some() => prev.parse().ok(),
            _ => last.parse().ok(),
        }
    })
}

//! Value codec: engine values to and from JSON text
//!
//! Everything that crosses the boundary travels as UTF-8 JSON with an explicit
//! byte length. An empty payload stands for `undefined`.

use std::fmt;

use rquickjs::{Array, Ctx, Value};
use serde::de::DeserializeOwned;

use crate::error::{BridgeError, BridgeResult};
use crate::exception::Thrown;

/// JSON text owned by whichever side currently holds it
///
/// Moving a `Payload` transfers ownership; dropping it (or calling
/// [`Payload::release`]) frees the buffer exactly once.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Payload {
    text: Box<str>,
}

impl Payload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().into_boxed_str(),
        }
    }

    /// The empty payload, meaning `undefined`
    pub fn undefined() -> Self {
        Self::default()
    }

    /// Serialize a host value
    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::new(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Explicit byte length; the text is never NUL-terminated
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }

    pub fn is_undefined(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text.into_string()
    }

    /// Parse into a host value; `undefined` becomes `null`
    pub fn to_json(&self) -> BridgeResult<serde_json::Value> {
        if self.is_undefined() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&self.text)?)
    }

    /// Deserialize into a Rust type
    pub fn deserialize<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        let text = if self.is_undefined() {
            "null"
        } else {
            &self.text
        };
        Ok(serde_json::from_str(text)?)
    }

    /// Give the buffer back
    pub fn release(self) {}
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_undefined() {
            write!(f, "Payload(undefined)")
        } else {
            write!(f, "Payload({})", self.text)
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for Payload {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Stringify an engine value
///
/// Values JSON cannot represent at top level (`undefined`, functions,
/// symbols) produce the empty payload.
pub fn encode<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> BridgeResult<Payload> {
    match ctx.json_stringify(value) {
        Ok(Some(text)) => Ok(Payload::new(text.to_string()?)),
        Ok(None) => Ok(Payload::undefined()),
        Err(rquickjs::Error::Exception) => {
            let thrown = Thrown::take(ctx);
            if thrown.is_out_of_memory() {
                return Err(BridgeError::OutOfMemory);
            }
            Err(BridgeError::codec(format!(
                "could not stringify value: {}",
                thrown.display_message()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

/// Pack positional arguments into an array and stringify it
pub fn encode_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> BridgeResult<Payload> {
    let array = Array::new(ctx.clone())?;
    for (i, arg) in args.iter().enumerate() {
        array.set(i, arg.clone())?;
    }
    encode(ctx, array.into_value())
}

/// Parse JSON text into an engine value; empty text is `undefined`
pub fn decode<'js>(ctx: &Ctx<'js>, json: &str) -> BridgeResult<Value<'js>> {
    if json.is_empty() {
        return Ok(Value::new_undefined(ctx.clone()));
    }
    match ctx.json_parse(json) {
        Ok(value) => Ok(value),
        Err(rquickjs::Error::Exception) => {
            let thrown = Thrown::take(ctx);
            if thrown.is_out_of_memory() {
                return Err(BridgeError::OutOfMemory);
            }
            Err(BridgeError::codec(format!(
                "could not parse JSON: {}",
                thrown.display_message()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

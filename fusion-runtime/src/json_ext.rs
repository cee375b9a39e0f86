//! Performance oriented JSON manipulation.

use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

/// A JSON object.
pub(crate) type Object = serde_json_bytes::Map<ByteString, Value>;

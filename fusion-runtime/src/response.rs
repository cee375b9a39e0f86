use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;

use crate::graphql::Error;
use crate::json_ext::Object;

/// A GraphQL primary response.
///
/// Used for unified-schema and subgraph results alike. Subscription results
/// are streams of these.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        extensions: Map<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// True when the response carries at least one GraphQL error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_response_serialization() {
        let response = Response::builder()
            .data(json!({"me": {"name": "Ada"}}))
            .build();
        let serialized = serde_json::to_string(&response).unwrap();
        assert_eq!(serialized, r#"{"data":{"me":{"name":"Ada"}}}"#);
    }

    #[test]
    fn test_response_deserialization_with_errors() {
        let response: Response = serde_json::from_str(
            r#"{"errors":[{"message":"boom","locations":[{"line":1,"column":2}]}]}"#,
        )
        .unwrap();
        assert!(response.data.is_none());
        assert!(response.has_errors());
        assert_eq!(response.errors[0].message, "boom");
        assert_eq!(response.errors[0].locations[0].line, 1);
    }
}

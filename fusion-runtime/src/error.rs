//! Runtime errors.

use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

use crate::graphql;

/// Trait used to add a mandatory `code` extension to GraphQL errors.
pub(crate) trait ErrorExtension {
    fn extension_code(&self) -> String;
}

/// Error types for subgraph execution.
///
/// Note that these are not returned to the client as-is, but are instead
/// converted to JSON for [`graphql::Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// transport '{kind}' could not be resolved: it is not in the configured transports and no module named '{module}' is registered
    TransportNotFound {
        /// The transport kind requested by the subgraph's transport entry.
        kind: String,

        /// The conventional module name derived from the kind.
        module: String,
    },

    /// subgraph '{service}' has no transport entry in the supergraph
    TransportEntryNotFound {
        /// The subgraph with no transport entry.
        service: String,
    },

    /// could not initialize the transport executor for subgraph '{service}': {reason}
    TransportInitialization {
        /// The subgraph whose executor failed to initialize.
        service: String,

        /// The reason initialization failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the deserialization failed.
        reason: String,
    },

    /// fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestTransportError {
        /// The service that failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// hook failed for service '{service}': {reason}
    HookError {
        /// The service whose hook chain was aborted.
        service: String,

        /// The reason the hook failed.
        reason: String,
    },

    /// service '{service}' is unavailable: the runtime is shutting down
    ShutdownInProgress {
        /// The service that was requested during shutdown.
        service: String,
    },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        let mut value = serde_json_bytes::to_value(self).unwrap_or_default();
        if let Some(extensions) = value.as_object_mut() {
            extensions
                .entry("code")
                .or_insert_with(|| self.extension_code().into());
        }

        graphql::Error {
            message: self.to_string(),
            locations: Default::default(),
            extensions: value.as_object().cloned().unwrap_or_default(),
        }
    }

    /// Convert the error to an appropriate response.
    pub fn to_response(&self) -> graphql::Response {
        graphql::Response {
            errors: vec![self.to_graphql_error()],
            ..graphql::Response::default()
        }
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::TransportNotFound { .. } => "TRANSPORT_NOT_FOUND",
            FetchError::TransportEntryNotFound { .. } => "TRANSPORT_ENTRY_NOT_FOUND",
            FetchError::TransportInitialization { .. } => "TRANSPORT_INITIALIZATION_FAILED",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestTransportError { .. } => "SUBREQUEST_TRANSPORT_ERROR",
            FetchError::HookError { .. } => "SUBGRAPH_HOOK_ERROR",
            FetchError::ShutdownInProgress { .. } => "SHUTDOWN_IN_PROGRESS",
        }
        .to_string()
    }
}

/// Error types for schema composition.
#[derive(Error, Display, Debug, Clone)]
#[non_exhaustive]
pub enum SchemaError {
    /// no schema registered for subgraph '{subgraph}'
    MissingSubgraph {
        /// The subgraph with no registered schema.
        subgraph: String,
    },

    /// failed to fetch the service definition from subgraph '{subgraph}'
    SdlFetch {
        /// The subgraph that rejected the service definition request.
        subgraph: String,

        /// The GraphQL errors the subgraph responded with.
        errors: Vec<graphql::Error>,
    },

    /// schema for subgraph '{subgraph}' could not be built: {reason}
    Parse {
        /// The subgraph whose schema failed to parse or validate.
        subgraph: String,

        /// The parser or validation failure.
        reason: String,
    },

    /// failed to stitch the unified schema: {reason}
    Stitch {
        /// The stitching failure.
        reason: String,
    },
}

impl SchemaError {
    /// The underlying GraphQL errors for an SDL fetch failure, empty otherwise.
    pub fn errors(&self) -> &[graphql::Error] {
        match self {
            SchemaError::SdlFetch { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl ErrorExtension for SchemaError {
    fn extension_code(&self) -> String {
        match self {
            SchemaError::MissingSubgraph { .. } => "SUBGRAPH_SCHEMA_NOT_FOUND",
            SchemaError::SdlFetch { .. } => "SUBGRAPH_SDL_FETCH_ERROR",
            SchemaError::Parse { .. } => "SUBGRAPH_SCHEMA_INVALID",
            SchemaError::Stitch { .. } => "SCHEMA_STITCH_ERROR",
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_to_graphql_error() {
        let error = FetchError::TransportNotFound {
            kind: "ghost".to_string(),
            module: "fusion-transport-ghost".to_string(),
        };
        let gql = error.to_graphql_error();
        assert!(gql.message.contains("ghost"));
        assert!(gql.message.contains("fusion-transport-ghost"));
        assert_eq!(
            gql.extensions.get("code").and_then(|v| v.as_str()),
            Some("TRANSPORT_NOT_FOUND")
        );
        assert_eq!(
            gql.extensions.get("kind").and_then(|v| v.as_str()),
            Some("ghost")
        );
    }

    #[test]
    fn test_fetch_error_to_response() {
        let error = FetchError::HookError {
            service: "users".to_string(),
            reason: "boom".to_string(),
        };
        let response = error.to_response();
        assert!(response.data.is_none());
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].message.contains("users"));
    }
}

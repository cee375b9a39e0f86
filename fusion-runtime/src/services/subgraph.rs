#![allow(missing_docs)] // FIXME

use std::fmt;

use static_assertions::assert_impl_all;

use crate::graphql;
use crate::graphql::OperationKind;
use crate::graphql::ResponseStream;
use crate::Context;

assert_impl_all!(Request: Send);
/// A request bound for one subgraph.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Request {
    /// The operation to execute against the subgraph.
    pub operation: graphql::Request,

    pub operation_kind: OperationKind,

    pub context: Context,
}

#[buildstructor::buildstructor]
impl Request {
    /// This is the constructor (or builder) to use when constructing a real Request.
    ///
    /// Required parameters are required in non-testing code to create a Request.
    #[builder(visibility = "pub")]
    fn new(operation: graphql::Request, operation_kind: OperationKind, context: Context) -> Request {
        Self {
            operation,
            operation_kind,
            context,
        }
    }

    /// This is the constructor (or builder) to use when constructing a "fake" Request.
    ///
    /// This does not enforce the provision of the data that is required for a fully functional
    /// Request. It's usually enough for testing, when a fully constructed Request is
    /// difficult to construct and not required for the purposes of the test.
    #[builder(visibility = "pub")]
    fn fake_new(
        operation: Option<graphql::Request>,
        operation_kind: Option<OperationKind>,
        context: Option<Context>,
    ) -> Request {
        Request::new(
            operation.unwrap_or_default(),
            operation_kind.unwrap_or(OperationKind::Query),
            context.unwrap_or_default(),
        )
    }
}

assert_impl_all!(Response: Send);
/// The result of executing a request against one subgraph.
///
/// Queries and mutations produce a single response; subscriptions produce a
/// stream of them.
#[non_exhaustive]
pub enum Response {
    Single(graphql::Response),
    Stream(ResponseStream),
}

impl Response {
    /// The single response, if this is not a stream.
    pub fn into_single(self) -> Option<graphql::Response> {
        match self {
            Response::Single(response) => Some(response),
            Response::Stream(_) => None,
        }
    }

    /// The response stream, if this is one.
    pub fn into_stream(self) -> Option<ResponseStream> {
        match self {
            Response::Single(_) => None,
            Response::Stream(stream) => Some(stream),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Response::Stream(_))
    }
}

impl From<graphql::Response> for Response {
    fn from(response: graphql::Response) -> Self {
        Response::Single(response)
    }
}

impl From<ResponseStream> for Response {
    fn from(stream: ResponseStream) -> Self {
        Response::Stream(stream)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Single(response) => f.debug_tuple("Single").field(response).finish(),
            Response::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}

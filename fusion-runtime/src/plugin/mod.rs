//! Hook pipeline for subgraph execution.
//!
//! Every request to a subgraph passes through an ordered chain of
//! [`SubgraphExecuteHook`]s before it reaches the transport executor. A hook
//! can rewrite the request, substitute the executor outright, and observe the
//! result once it is available — including per-item observation of streaming
//! results. Hooks for one request always run sequentially, in registration
//! order, so an executor substituted by one hook is what the next hook sees.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context as TaskContext;
use std::task::Poll;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::Stream;
use pin_project_lite::pin_project;
use tower::BoxError;
use tracing::Instrument;

use crate::error::FetchError;
use crate::executor::SharedExecutor;
use crate::executor::SubgraphExecutor;
use crate::graphql;
use crate::graphql::ResponseStream;
use crate::naming::SubgraphName;
use crate::services::SubgraphRequest;
use crate::services::SubgraphResponse;
use crate::transport::SubgraphSchemaGetter;
use crate::transport::TransportEntry;
use crate::transport::TransportEntryGetter;

/// A hook invoked before every subgraph execution.
///
/// The returned [`SubgraphExecuteDoneHook`], if any, is invoked with the
/// result of the execution. Hooks run in registration order; their done hooks
/// run in the same order.
#[async_trait]
pub trait SubgraphExecuteHook: Send + Sync + 'static {
    async fn on_subgraph_execute(
        &self,
        payload: &mut SubgraphExecutePayload<'_>,
    ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError>;
}

/// Observes the result of one subgraph execution.
#[async_trait]
pub trait SubgraphExecuteDoneHook: Send + Sync {
    async fn on_execute_done(
        &self,
        payload: &mut SubgraphResultPayload<'_>,
    ) -> Result<Option<Box<dyn ResponseStreamHook>>, BoxError>;
}

/// Observes a streaming result item by item.
///
/// `on_next` may rewrite each response before it reaches the consumer, and
/// runs inline with consumer pull so upstream backpressure is preserved.
/// `on_end` fires exactly once when the stream terminates, whether it was
/// exhausted, failed, or dropped by the consumer; it is synchronous so that
/// dropping the stream can still run it.
#[async_trait]
pub trait ResponseStreamHook: Send + Sync {
    async fn on_next(&self, _response: &mut graphql::Response) {}

    fn on_end(&self) {}
}

/// What a [`SubgraphExecuteHook`] gets to look at and change.
pub struct SubgraphExecutePayload<'a> {
    subgraph_name: &'a SubgraphName,
    request: &'a mut SubgraphRequest,
    executor: &'a mut SharedExecutor,
    subgraph_schemas: &'a SubgraphSchemaGetter,
    transport_entries: &'a TransportEntryGetter,
    request_id: Option<String>,
}

impl<'a> SubgraphExecutePayload<'a> {
    pub fn subgraph_name(&self) -> &SubgraphName {
        self.subgraph_name
    }

    /// The subgraph's current schema, read lazily.
    pub fn subgraph_schema(
        &self,
    ) -> Option<Arc<apollo_compiler::validation::Valid<apollo_compiler::Schema>>> {
        (self.subgraph_schemas)(self.subgraph_name)
    }

    /// The subgraph's current transport entry, read lazily.
    pub fn transport_entry(&self) -> Option<TransportEntry> {
        (self.transport_entries)(self.subgraph_name)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn execution_request(&self) -> &SubgraphRequest {
        self.request
    }

    /// Replace the request that will be sent upstream. Visible to every later
    /// hook and to the executor.
    pub fn set_execution_request(&mut self, request: SubgraphRequest) {
        *self.request = request;
    }

    pub fn executor(&self) -> &SharedExecutor {
        self.executor
    }

    /// Replace the executor that will serve this request. The last
    /// substitution wins.
    pub fn set_executor(&mut self, executor: SharedExecutor) {
        *self.executor = executor;
    }
}

/// What a [`SubgraphExecuteDoneHook`] gets to look at and change.
pub struct SubgraphResultPayload<'a> {
    result: &'a mut SubgraphResponse,
}

impl<'a> SubgraphResultPayload<'a> {
    pub fn result(&self) -> &SubgraphResponse {
        self.result
    }

    /// Replace the result handed to later done hooks and, ultimately, the
    /// caller.
    pub fn set_result(&mut self, result: SubgraphResponse) {
        *self.result = result;
    }
}

/// Wrap an executor so every request runs through the hook chain.
pub fn wrap_executor_with_hooks(
    executor: SharedExecutor,
    subgraph_name: SubgraphName,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    subgraph_schemas: SubgraphSchemaGetter,
    transport_entries: TransportEntryGetter,
) -> SharedExecutor {
    Arc::new(HookedExecutor {
        inner: executor,
        subgraph_name,
        hooks,
        subgraph_schemas,
        transport_entries,
    })
}

struct HookedExecutor {
    inner: SharedExecutor,
    subgraph_name: SubgraphName,
    hooks: Arc<[Arc<dyn SubgraphExecuteHook>]>,
    subgraph_schemas: SubgraphSchemaGetter,
    transport_entries: TransportEntryGetter,
}

#[async_trait]
impl SubgraphExecutor for HookedExecutor {
    async fn execute(&self, request: SubgraphRequest) -> Result<SubgraphResponse, FetchError> {
        let request_id = request.context.request_id().map(str::to_string);
        let span = tracing::debug_span!(
            "subgraph_request",
            subgraph.name = %self.subgraph_name,
            request.id = request_id.as_deref().unwrap_or_default(),
        );
        self.execute_with_hooks(request, request_id)
            .instrument(span)
            .await
    }
}

impl HookedExecutor {
    async fn execute_with_hooks(
        &self,
        mut request: SubgraphRequest,
        request_id: Option<String>,
    ) -> Result<SubgraphResponse, FetchError> {
        if self.hooks.is_empty() {
            return self.inner.execute(request).await;
        }

        let mut executor = self.inner.clone();
        let mut done_hooks: Vec<Box<dyn SubgraphExecuteDoneHook>> = Vec::new();
        for hook in self.hooks.iter() {
            let mut payload = SubgraphExecutePayload {
                subgraph_name: &self.subgraph_name,
                request: &mut request,
                executor: &mut executor,
                subgraph_schemas: &self.subgraph_schemas,
                transport_entries: &self.transport_entries,
                request_id: request_id.clone(),
            };
            match hook.on_subgraph_execute(&mut payload).await {
                Ok(Some(done)) => done_hooks.push(done),
                Ok(None) => {}
                Err(err) => {
                    let error = FetchError::HookError {
                        service: self.subgraph_name.to_string(),
                        reason: err.to_string(),
                    };
                    // Done hooks queued by earlier hooks still observe the
                    // failure, once, with an error-shaped result.
                    abort_done_hooks(&error, done_hooks).await;
                    return Err(error);
                }
            }
        }

        // A transport-level failure propagates as-is: there is no result for
        // the done hooks to observe. In-band GraphQL errors flow through.
        let mut result = executor.execute(request).await?;

        let mut observers: Vec<Box<dyn ResponseStreamHook>> = Vec::new();
        for done in done_hooks {
            let mut payload = SubgraphResultPayload {
                result: &mut result,
            };
            match done.on_execute_done(&mut payload).await {
                Ok(Some(observer)) => observers.push(observer),
                Ok(None) => {}
                Err(err) => {
                    for observer in &observers {
                        observer.on_end();
                    }
                    return Err(FetchError::HookError {
                        service: self.subgraph_name.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        match result {
            SubgraphResponse::Stream(stream) if !observers.is_empty() => Ok(
                SubgraphResponse::Stream(Box::pin(HookedStream::new(stream, observers))),
            ),
            other => Ok(other),
        }
    }
}

async fn abort_done_hooks(error: &FetchError, done_hooks: Vec<Box<dyn SubgraphExecuteDoneHook>>) {
    let mut result = SubgraphResponse::Single(error.to_response());
    for done in done_hooks {
        let mut payload = SubgraphResultPayload {
            result: &mut result,
        };
        if let Ok(Some(observer)) = done.on_execute_done(&mut payload).await {
            observer.on_end();
        }
    }
}

pin_project! {
    /// A response stream with `on_next`/`on_end` observers attached.
    ///
    /// Each inner item runs through every observer before it is yielded; at
    /// most one item is in flight at a time, so the consumer's pull rate is
    /// the upstream's pull rate. The end guard fires `on_end` on exhaustion
    /// and on drop, whichever comes first.
    struct HookedStream {
        #[pin]
        inner: ResponseStream,
        in_flight: Option<BoxFuture<'static, graphql::Response>>,
        end: EndGuard,
    }
}

impl HookedStream {
    fn new(inner: ResponseStream, observers: Vec<Box<dyn ResponseStreamHook>>) -> Self {
        Self {
            inner,
            in_flight: None,
            end: EndGuard {
                observers: observers.into(),
                fired: false,
            },
        }
    }
}

impl Stream for HookedStream {
    type Item = graphql::Response;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if this.end.fired {
            return Poll::Ready(None);
        }
        loop {
            if let Some(in_flight) = this.in_flight.as_mut() {
                let response = futures::ready!(in_flight.as_mut().poll(cx));
                *this.in_flight = None;
                return Poll::Ready(Some(response));
            }
            match futures::ready!(this.inner.as_mut().poll_next(cx)) {
                Some(mut response) => {
                    let observers = this.end.observers.clone();
                    *this.in_flight = Some(Box::pin(async move {
                        for observer in observers.iter() {
                            observer.on_next(&mut response).await;
                        }
                        response
                    }));
                }
                None => {
                    this.end.fire();
                    return Poll::Ready(None);
                }
            }
        }
    }
}

struct EndGuard {
    observers: Arc<[Box<dyn ResponseStreamHook>]>,
    fired: bool,
}

impl EndGuard {
    fn fire(&mut self) {
        if !self.fired {
            self.fired = true;
            for observer in self.observers.iter() {
                observer.on_end();
            }
        }
    }
}

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.fire();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use futures::StreamExt;
    use serde_json_bytes::json;

    use super::*;
    use crate::executor::from_fn;
    use crate::Context;

    fn getters() -> (SubgraphSchemaGetter, TransportEntryGetter) {
        (Arc::new(|_: &SubgraphName| None), Arc::new(|_: &SubgraphName| None))
    }

    fn wrap(
        executor: SharedExecutor,
        hooks: Vec<Arc<dyn SubgraphExecuteHook>>,
    ) -> SharedExecutor {
        let (schemas, entries) = getters();
        wrap_executor_with_hooks(
            executor,
            SubgraphName::new("accounts").unwrap(),
            hooks.into(),
            schemas,
            entries,
        )
    }

    fn upstream_counter(counter: Arc<AtomicUsize>) -> SharedExecutor {
        from_fn(move |request: SubgraphRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(SubgraphResponse::Single(
                    graphql::Response::builder()
                        .data(json!({
                            "operation": request.operation.operation_name
                        }))
                        .build(),
                ))
            }
        })
    }

    /// Records the order hooks fire in and returns a done hook that records
    /// its own invocation.
    struct OrderHook {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SubgraphExecuteHook for OrderHook {
        async fn on_subgraph_execute(
            &self,
            _payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            self.log.lock().unwrap().push(format!("pre:{}", self.name));
            Ok(Some(Box::new(OrderDoneHook {
                name: self.name,
                log: self.log.clone(),
            })))
        }
    }

    struct OrderDoneHook {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SubgraphExecuteDoneHook for OrderDoneHook {
        async fn on_execute_done(
            &self,
            _payload: &mut SubgraphResultPayload<'_>,
        ) -> Result<Option<Box<dyn ResponseStreamHook>>, BoxError> {
            self.log.lock().unwrap().push(format!("done:{}", self.name));
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            upstream_counter(upstream.clone()),
            vec![
                Arc::new(OrderHook {
                    name: "first",
                    log: log.clone(),
                }),
                Arc::new(OrderHook {
                    name: "second",
                    log: log.clone(),
                }),
            ],
        );

        executor
            .execute(SubgraphRequest::fake_builder().build())
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre:first", "pre:second", "done:first", "done:second"]
        );
        assert_eq!(upstream.load(Ordering::SeqCst), 1);
    }

    struct RenameOperation;

    #[async_trait]
    impl SubgraphExecuteHook for RenameOperation {
        async fn on_subgraph_execute(
            &self,
            payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            let mut request = payload.execution_request().clone();
            request.operation.operation_name = Some("Renamed".to_string());
            payload.set_execution_request(request);
            Ok(None)
        }
    }

    struct AssertRenamed;

    #[async_trait]
    impl SubgraphExecuteHook for AssertRenamed {
        async fn on_subgraph_execute(
            &self,
            payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            assert_eq!(
                payload
                    .execution_request()
                    .operation
                    .operation_name
                    .as_deref(),
                Some("Renamed")
            );
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_request_rewrite_is_visible_downstream() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            upstream_counter(upstream.clone()),
            vec![Arc::new(RenameOperation), Arc::new(AssertRenamed)],
        );

        let response = executor
            .execute(SubgraphRequest::fake_builder().build())
            .await
            .unwrap();

        let response = response.into_single().unwrap();
        assert_eq!(response.data, Some(json!({"operation": "Renamed"})));
    }

    struct SubstituteExecutor;

    #[async_trait]
    impl SubgraphExecuteHook for SubstituteExecutor {
        async fn on_subgraph_execute(
            &self,
            payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            payload.set_executor(from_fn(|_request| async {
                Ok(SubgraphResponse::Single(
                    graphql::Response::builder().data(json!({"ok": true})).build(),
                ))
            }));
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_substituted_executor_bypasses_upstream() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            upstream_counter(upstream.clone()),
            vec![Arc::new(SubstituteExecutor)],
        );

        let response = executor
            .execute(SubgraphRequest::fake_builder().build())
            .await
            .unwrap()
            .into_single()
            .unwrap();

        assert_eq!(response.data, Some(json!({"ok": true})));
        assert_eq!(upstream.load(Ordering::SeqCst), 0);
    }

    /// Multiplies every streamed `n` by ten and counts stream terminations.
    struct TimesTen {
        ended: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResponseStreamHook for TimesTen {
        async fn on_next(&self, response: &mut graphql::Response) {
            let n = response
                .data
                .as_ref()
                .and_then(|data| data.as_object())
                .and_then(|data| data.get("n"))
                .and_then(|n| n.as_i64())
                .unwrap_or_default();
            response.data = Some(json!({"n": n * 10}));
        }

        fn on_end(&self) {
            self.ended.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ObserveStream {
        ended: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SubgraphExecuteHook for ObserveStream {
        async fn on_subgraph_execute(
            &self,
            _payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            let ended = self.ended.clone();
            Ok(Some(Box::new(ObserveStreamDone { ended })))
        }
    }

    struct ObserveStreamDone {
        ended: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SubgraphExecuteDoneHook for ObserveStreamDone {
        async fn on_execute_done(
            &self,
            _payload: &mut SubgraphResultPayload<'_>,
        ) -> Result<Option<Box<dyn ResponseStreamHook>>, BoxError> {
            Ok(Some(Box::new(TimesTen {
                ended: self.ended.clone(),
            })))
        }
    }

    fn counting_stream() -> SharedExecutor {
        from_fn(|_request| async {
            let responses: Vec<graphql::Response> = (1..=3)
                .map(|n| graphql::Response::builder().data(json!({ "n": n })).build())
                .collect();
            Ok(SubgraphResponse::Stream(Box::pin(tokio_stream::iter(
                responses,
            ))))
        })
    }

    #[tokio::test]
    async fn test_stream_items_are_rewritten_and_end_fires_once() {
        let ended = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            counting_stream(),
            vec![Arc::new(ObserveStream {
                ended: ended.clone(),
            })],
        );

        let stream = executor
            .execute(
                SubgraphRequest::fake_builder()
                    .operation_kind(graphql::OperationKind::Subscription)
                    .build(),
            )
            .await
            .unwrap()
            .into_stream()
            .unwrap();

        let seen: Vec<i64> = stream
            .map(|response| {
                response
                    .data
                    .as_ref()
                    .and_then(|data| data.as_object())
                    .and_then(|data| data.get("n"))
                    .and_then(|n| n.as_i64())
                    .unwrap()
            })
            .collect()
            .await;

        assert_eq!(seen, vec![10, 20, 30]);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_stream_still_fires_on_end() {
        let ended = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            counting_stream(),
            vec![Arc::new(ObserveStream {
                ended: ended.clone(),
            })],
        );

        let mut stream = executor
            .execute(
                SubgraphRequest::fake_builder()
                    .operation_kind(graphql::OperationKind::Subscription)
                    .build(),
            )
            .await
            .unwrap()
            .into_stream()
            .unwrap();

        // Take one item, then abandon the subscription.
        let first = stream.next().await.unwrap();
        assert_eq!(first.data, Some(json!({"n": 10})));
        drop(stream);

        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    struct FailingHook;

    #[async_trait]
    impl SubgraphExecuteHook for FailingHook {
        async fn on_subgraph_execute(
            &self,
            _payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            Err("token validation failed".into())
        }
    }

    struct CaptureResult {
        captured: Arc<Mutex<Option<graphql::Response>>>,
    }

    #[async_trait]
    impl SubgraphExecuteHook for CaptureResult {
        async fn on_subgraph_execute(
            &self,
            _payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            Ok(Some(Box::new(CaptureResultDone {
                captured: self.captured.clone(),
            })))
        }
    }

    struct CaptureResultDone {
        captured: Arc<Mutex<Option<graphql::Response>>>,
    }

    #[async_trait]
    impl SubgraphExecuteDoneHook for CaptureResultDone {
        async fn on_execute_done(
            &self,
            payload: &mut SubgraphResultPayload<'_>,
        ) -> Result<Option<Box<dyn ResponseStreamHook>>, BoxError> {
            if let SubgraphResponse::Single(response) = payload.result() {
                *self.captured.lock().unwrap() = Some(response.clone());
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_failing_hook_aborts_chain_and_feeds_done_hooks() {
        let captured = Arc::new(Mutex::new(None));
        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            upstream_counter(upstream.clone()),
            vec![
                Arc::new(CaptureResult {
                    captured: captured.clone(),
                }),
                Arc::new(FailingHook),
            ],
        );

        let error = executor
            .execute(SubgraphRequest::fake_builder().build())
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::HookError { .. }));
        assert!(error.to_string().contains("token validation failed"));
        // The upstream executor never ran, but the earlier hook's done hook
        // observed the error-shaped result.
        assert_eq!(upstream.load(Ordering::SeqCst), 0);
        let captured = captured.lock().unwrap().clone().unwrap();
        assert!(captured.has_errors());
    }

    struct RewriteResult;

    #[async_trait]
    impl SubgraphExecuteHook for RewriteResult {
        async fn on_subgraph_execute(
            &self,
            _payload: &mut SubgraphExecutePayload<'_>,
        ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
            Ok(Some(Box::new(RewriteResultDone)))
        }
    }

    struct RewriteResultDone;

    #[async_trait]
    impl SubgraphExecuteDoneHook for RewriteResultDone {
        async fn on_execute_done(
            &self,
            payload: &mut SubgraphResultPayload<'_>,
        ) -> Result<Option<Box<dyn ResponseStreamHook>>, BoxError> {
            payload.set_result(SubgraphResponse::Single(
                graphql::Response::builder()
                    .data(json!({"rewritten": true}))
                    .build(),
            ));
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_done_hook_rewrites_single_result() {
        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(upstream_counter(upstream), vec![Arc::new(RewriteResult)]);

        let response = executor
            .execute(SubgraphRequest::fake_builder().build())
            .await
            .unwrap()
            .into_single()
            .unwrap();

        assert_eq!(response.data, Some(json!({"rewritten": true})));
    }

    #[tokio::test]
    async fn test_request_id_reaches_the_payload() {
        struct AssertRequestId;

        #[async_trait]
        impl SubgraphExecuteHook for AssertRequestId {
            async fn on_subgraph_execute(
                &self,
                payload: &mut SubgraphExecutePayload<'_>,
            ) -> Result<Option<Box<dyn SubgraphExecuteDoneHook>>, BoxError> {
                assert_eq!(payload.request_id(), Some("req-42"));
                assert_eq!(payload.subgraph_name().as_str(), "accounts");
                Ok(None)
            }
        }

        let upstream = Arc::new(AtomicUsize::new(0));
        let executor = wrap(
            upstream_counter(upstream),
            vec![Arc::new(AssertRequestId)],
        );

        executor
            .execute(
                SubgraphRequest::fake_builder()
                    .context(Context::with_request_id("req-42"))
                    .build(),
            )
            .await
            .unwrap();
    }
}

//! Query executor: one HTTP operation per dispatch.
//!
//! The executor never fails synchronously and never propagates a fault:
//! every outcome, including transform-hook failures and aborts, is
//! normalized into an [`OperationResult`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::config::{ClientConfig, ClientHooks};
use crate::error::{Result, TransportError};
use crate::operation::Operation;
use crate::result::OperationResult;
use crate::transport::{AbortHandle, HttpPayload, HttpTransport};

/// An in-flight execution: the eventual result and an advisory abort handle.
pub struct Execution {
    /// Resolves exactly once with the attempt's result.
    pub result: BoxFuture<'static, OperationResult>,
    /// Cancels the in-flight transport call; a no-op after completion.
    pub abort: AbortHandle,
}

#[derive(Clone)]
pub(crate) struct QueryExecutor {
    transport: HttpTransport,
    config: Arc<ClientConfig>,
    hooks: Arc<ClientHooks>,
    pending: Arc<AtomicUsize>,
}

impl QueryExecutor {
    pub fn new(
        transport: HttpTransport,
        config: Arc<ClientConfig>,
        hooks: Arc<ClientHooks>,
    ) -> Self {
        Self {
            transport,
            config,
            hooks,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of requests currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Dispatch one operation. Increments the pending counter immediately;
    /// the counter is decremented exactly once when the returned future
    /// resolves, whether by completion, failure, or abort.
    pub fn execute(&self, operation: &Operation) -> Execution {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let (abort, abort_rx) = AbortHandle::new();

        let executor = self.clone();
        let operation = operation.clone();
        let handle = abort.clone();
        let result = async move {
            let result = tokio::select! {
                result = executor.run(&operation) => result,
                _ = abort_rx => {
                    tracing::debug!(target: "meridian_graphql::executor", "request aborted");
                    OperationResult::network_error("request aborted", None)
                }
            };
            handle.complete();
            executor.pending.fetch_sub(1, Ordering::SeqCst);
            result
        }
        .boxed();

        Execution { result, abort }
    }

    async fn run(&self, operation: &Operation) -> OperationResult {
        let request = match self.build_request(operation) {
            Ok(request) => request,
            Err(e) => {
                return OperationResult::network_error(
                    format!("failed to build request: {e}"),
                    None,
                );
            }
        };

        let request = match &self.hooks.request_transform {
            Some(transform) => match transform(request).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(target: "meridian_graphql::executor", error = %e, "request transform failed");
                    return OperationResult::network_error(
                        format!("request transform failed: {e}"),
                        Some(Value::String(e.to_string())),
                    );
                }
            },
            None => request,
        };

        match self.transport.send(request).await {
            Ok(payload) => self.validate(operation, payload),
            Err(e) => OperationResult::network_error(
                format!("request failed: {e}"),
                Some(Value::String(e.to_string())),
            ),
        }
    }

    fn build_request(&self, operation: &Operation) -> Result<reqwest::Request> {
        let mut url = url::Url::parse(&self.config.url)?;
        let mut operation = operation.clone();

        if self.config.document_id_as_query
            && let Some(id) = operation.document_id.take()
        {
            url.query_pairs_mut().append_pair("documentId", &id);
        }

        let builder = self.transport.client().post(url);
        let builder = if self.config.form_body {
            let mut form = reqwest::multipart::Form::new();
            if let Some(query) = &operation.query {
                form = form.text("query", query.clone());
            }
            if let Some(id) = &operation.document_id {
                form = form.text("documentId", id.clone());
            }
            if let Some(variables) = &operation.variables {
                form = form.text("variables", variables.to_string());
            }
            if let Some(name) = &operation.operation_name {
                form = form.text("operationName", name.clone());
            }
            if let Some(extensions) = &operation.extensions {
                form = form.text("extensions", extensions.to_string());
            }
            builder.multipart(form)
        } else {
            builder
                .header(http::header::ACCEPT, "application/json")
                .json(&operation)
        };

        builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    /// Validate status and content type, then normalize the body.
    ///
    /// By default any 2xx or 4xx response is parsed as JSON. In strict mode
    /// 2xx additionally requires `application/graphql-response+json` or
    /// `application/json`, and 4xx requires
    /// `application/graphql-response+json`. Anything else becomes a
    /// network-error result carrying the status text, without touching the
    /// body.
    fn validate(&self, operation: &Operation, payload: HttpPayload) -> OperationResult {
        let ok_2xx = (200..300).contains(&payload.status);
        let ok_4xx = (400..500).contains(&payload.status);

        let content_type_ok = if !self.config.strict_validation {
            true
        } else {
            match payload.content_type.as_deref() {
                Some(ct) if ok_2xx => {
                    ct.starts_with("application/graphql-response+json")
                        || ct.starts_with("application/json")
                }
                Some(ct) if ok_4xx => ct.starts_with("application/graphql-response+json"),
                _ => false,
            }
        };

        if !(ok_2xx || ok_4xx) || !content_type_ok {
            tracing::warn!(
                target: "meridian_graphql::executor",
                status = payload.status,
                content_type = payload.content_type.as_deref().unwrap_or(""),
                "rejected HTTP response"
            );
            if let Some(log) = &self.hooks.log_http_error {
                log(operation, &payload);
            }
            return OperationResult::network_error(
                payload.status_text.clone(),
                Some(serde_json::json!({ "status": payload.status })),
            );
        }

        OperationResult::from_json_body(&payload.body, payload.content_length)
    }
}

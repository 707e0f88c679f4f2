//! `Attempt<T>` implementations wiring the executor into the selector's
//! retry loop, for both the non-streaming and streaming call shapes.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gatehouse::credential::Credential;
use gatehouse::executor::{
    CredentialAttachment, Executor, ExecutorError, ExecutorResponse, ExecutorResult, classify_response,
    classify_transport_error,
};
use gatehouse::selector::{Attempt, AttemptResult};

/// One non-streaming upstream call, classified against the selector's retry
/// policy from its HTTP status / body shape.
pub struct NonStreamAttempt<'a> {
    pub executor: &'a Executor,
    pub url: String,
    pub body: Vec<u8>,
    pub attach: CredentialAttachment,
    pub cancel: CancellationToken,
}

#[async_trait]
impl<'a> Attempt<ExecutorResponse> for NonStreamAttempt<'a> {
    async fn call(&self, credential: &Credential) -> AttemptResult<ExecutorResponse> {
        let req = gatehouse::executor::ExecutorRequest::new(self.url.clone(), self.body.clone(), self.attach.clone());
        match self.executor.call_non_streaming(&req, credential, &self.cancel).await {
            Ok(response) => {
                let classification = classify_response(response.status, &response.body);
                let status = Some(response.status);
                let message = if matches!(
                    classification,
                    gatehouse::selector::Classification::Success
                ) {
                    String::new()
                } else {
                    String::from_utf8_lossy(&response.body).to_string()
                };
                AttemptResult {
                    classification,
                    value: Some(response),
                    message,
                    status,
                }
            }
            Err(ExecutorError::Cancelled) => {
                AttemptResult::non_retryable("cancelled", Some(499))
            }
            Err(ExecutorError::BodyTooLarge { limit }) => {
                AttemptResult::non_retryable(format!("upstream response exceeded {limit} bytes"), Some(502))
            }
            Err(e @ ExecutorError::Network(_)) => {
                let classification = classify_transport_error();
                AttemptResult {
                    classification,
                    value: None,
                    message: e.to_string(),
                    status: None,
                }
            }
            Err(e @ ExecutorError::Status { status, .. }) => {
                AttemptResult {
                    classification: classify_response(status, e.to_string().as_bytes()),
                    value: None,
                    message: e.to_string(),
                    status: Some(status),
                }
            }
        }
    }
}

/// One streaming upstream call: the executor itself determines
/// success/failure from the initial response status (since the body streams
/// afterward), so this simply forwards that classification.
pub struct StreamAttempt<'a> {
    pub executor: &'a Executor,
    pub url: String,
    pub body: Vec<u8>,
    pub attach: CredentialAttachment,
    pub cancel: CancellationToken,
}

#[async_trait]
impl<'a> Attempt<mpsc::Receiver<ExecutorResult<Bytes>>> for StreamAttempt<'a> {
    async fn call(&self, credential: &Credential) -> AttemptResult<mpsc::Receiver<ExecutorResult<Bytes>>> {
        let req = gatehouse::executor::ExecutorRequest::new(self.url.clone(), self.body.clone(), self.attach.clone());
        match self.executor.call_streaming(&req, credential, self.cancel.clone()).await {
            Ok(rx) => AttemptResult::success(rx),
            Err(ExecutorError::Status { status, message }) => AttemptResult {
                classification: classify_response(status, message.as_bytes()),
                value: None,
                message,
                status: Some(status),
            },
            Err(ExecutorError::Cancelled) => AttemptResult::non_retryable("cancelled", Some(499)),
            Err(ExecutorError::BodyTooLarge { limit }) => {
                AttemptResult::non_retryable(format!("upstream response exceeded {limit} bytes"), Some(502))
            }
            Err(e @ ExecutorError::Network(_)) => AttemptResult {
                classification: classify_transport_error(),
                value: None,
                message: e.to_string(),
                status: None,
            },
        }
    }
}

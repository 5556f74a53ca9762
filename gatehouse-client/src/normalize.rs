//! Response normalization.
//!
//! Errors reach the client on two paths: a non-2xx status, or
//! `success: false` inside a 2xx body. Both converge here on the same
//! [`ErrorClassifier`], so callers only ever see unwrapped `data` or a
//! [`ClassifiedError`].

use gatehouse_core::{ClassifiedError, Envelope, ErrorClassifier};
use serde_json::Value;

use crate::transport::{RawResponse, TransportError};

/// Unwraps envelopes and classifies failures.
#[derive(Debug, Clone, Default)]
pub struct ResponseNormalizer {
    classifier: ErrorClassifier,
}

impl ResponseNormalizer {
    pub fn new(classifier: ErrorClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Turn a transport outcome into `data` or a classified failure.
    pub fn normalize(
        &self,
        outcome: Result<RawResponse, TransportError>,
    ) -> Result<Value, ClassifiedError> {
        match outcome {
            Ok(response) => self.normalize_response(&response),
            Err(e) => Err(ClassifiedError::network(e.to_string())),
        }
    }

    /// Unwrap a received response.
    pub fn normalize_response(&self, response: &RawResponse) -> Result<Value, ClassifiedError> {
        match Envelope::parse(&response.body) {
            Some(envelope) if envelope.success => Ok(envelope.data.unwrap_or(Value::Null)),
            Some(envelope) => {
                let mut err = self.classifier.classify(
                    response.status,
                    envelope.error_code(),
                    envelope.error_message(),
                );
                err.request_id = envelope.request_id;
                Err(err)
            }
            None if response.is_success() && is_blank(&response.body) => Ok(Value::Null),
            None => Err(self.classifier.classify(response.status, None, None)),
        }
    }
}

fn is_blank(body: &[u8]) -> bool {
    body.iter().all(|b| b.is_ascii_whitespace())
}

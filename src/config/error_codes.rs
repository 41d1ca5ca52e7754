//! Backend status/code to error-kind mapping.
//!
//! Each backend family reports "resource absent" differently: SNS answers
//! HTTP 404 `NotFound`, SQS answers HTTP 400 with a queue-specific code.
//! The mapping is configuration so it can track the deployed backend.

use serde::Deserialize;

/// Logical kind of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Other,
}

/// Status/code table for one backend family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorCodeMapping {
    /// HTTP status the backend answers with for a missing resource.
    pub not_found_status: u16,
    /// Error codes that mean "missing resource". Empty matches on status alone.
    pub not_found_codes: Vec<String>,
    /// Error codes that mean a create lost a race with another creator.
    pub already_exists_codes: Vec<String>,
}

impl ErrorCodeMapping {
    /// SNS: `GetTopicAttributes` on a missing topic.
    pub fn sns() -> Self {
        Self {
            not_found_status: 404,
            not_found_codes: vec!["NotFound".to_string()],
            already_exists_codes: Vec::new(),
        }
    }

    /// SQS: query and JSON protocol spellings of the queue codes.
    pub fn sqs() -> Self {
        Self {
            not_found_status: 400,
            not_found_codes: vec![
                "AWS.SimpleQueueService.NonExistentQueue".to_string(),
                "QueueDoesNotExist".to_string(),
            ],
            already_exists_codes: vec![
                "QueueAlreadyExists".to_string(),
                "AWS.SimpleQueueService.QueueNameExists".to_string(),
                "QueueNameExists".to_string(),
            ],
        }
    }

    /// Classify a failed call by its HTTP status and service error code.
    pub fn classify(&self, status: Option<u16>, code: Option<&str>) -> ErrorKind {
        if let Some(code) = code {
            if self.already_exists_codes.iter().any(|c| c == code) {
                return ErrorKind::AlreadyExists;
            }
        }

        if status != Some(self.not_found_status) {
            return ErrorKind::Other;
        }

        if self.not_found_codes.is_empty() {
            return ErrorKind::NotFound;
        }

        match code {
            Some(code) if self.not_found_codes.iter().any(|c| c == code) => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        }
    }
}

impl Default for ErrorCodeMapping {
    fn default() -> Self {
        Self {
            not_found_status: 404,
            not_found_codes: Vec::new(),
            already_exists_codes: Vec::new(),
        }
    }
}

/// Mappings for both backend families.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorCodesConfig {
    /// Notification (topic) service.
    pub topic: ErrorCodeMapping,
    /// Queue service.
    pub queue: ErrorCodeMapping,
}

impl Default for ErrorCodesConfig {
    fn default() -> Self {
        Self {
            topic: ErrorCodeMapping::sns(),
            queue: ErrorCodeMapping::sqs(),
        }
    }
}

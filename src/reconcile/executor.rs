//! Mutation executor: applies one mutation with the transient-error retry policy.
//!
//! In dry-run mode only [`MutationTarget::verify`] is called; `apply` is never
//! reached, so no state-changing request leaves the process.

use std::time::Duration;

use crate::config::ReconcileSettings;
use crate::error::SyncError;
use crate::reconcile::model::FailureKind;
use crate::reconcile::traits::{Mutation, MutationTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Splits remote failures into retryable and non-retryable.
///
/// HTTP 429 and 5xx are transient by status. Anything else is transient only
/// if its message contains one of the configured patterns.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<String>,
}

impl ErrorClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, error: &SyncError) -> ErrorClass {
        if let Some(status) = error.status() {
            if status == 429 || (500..600).contains(&status) {
                return ErrorClass::Transient;
            }
        }
        if let SyncError::HttpError(e) = error {
            if e.is_timeout() || e.is_connect() {
                return ErrorClass::Transient;
            }
        }

        let message = error.to_string().to_lowercase();
        if self.patterns.iter().any(|p| message.contains(p)) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// Failure kind for an error that is recorded without retrying
    pub fn failure_kind(&self, error: &SyncError) -> FailureKind {
        match self.classify(error) {
            ErrorClass::Transient => FailureKind::TransientExhausted,
            ErrorClass::Permanent => FailureKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationResult {
    Applied { attempts: u32 },
    Simulated,
    Failed {
        kind: FailureKind,
        attempts: u32,
        message: String,
    },
}

pub struct MutationExecutor<'a, M> {
    target: &'a M,
    policy: RetryPolicy,
    classifier: ErrorClassifier,
    dry_run: bool,
}

impl<'a, M: MutationTarget> MutationExecutor<'a, M> {
    pub fn new(target: &'a M, policy: RetryPolicy, classifier: ErrorClassifier, dry_run: bool) -> Self {
        Self {
            target,
            policy,
            classifier,
            dry_run,
        }
    }

    pub fn from_settings(target: &'a M, settings: &ReconcileSettings, dry_run: bool) -> Self {
        Self::new(
            target,
            RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                backoff: settings.retry_backoff(),
            },
            ErrorClassifier::new(&settings.transient_patterns),
            dry_run,
        )
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    async fn attempt(&self, mutation: &Mutation) -> Result<(), SyncError> {
        if self.dry_run {
            self.target.verify(mutation).await
        } else {
            self.target.apply(mutation).await
        }
    }

    pub async fn execute(&self, mutation: &Mutation) -> MutationResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.attempt(mutation).await {
                Ok(()) if self.dry_run => {
                    tracing::info!(mailbox = mutation.mailbox(), "[dry-run] would {}", mutation);
                    return MutationResult::Simulated;
                }
                Ok(()) => {
                    tracing::debug!(mailbox = mutation.mailbox(), attempts, "Applied: {}", mutation);
                    return MutationResult::Applied { attempts };
                }
                Err(e) => match self.classifier.classify(&e) {
                    ErrorClass::Transient if attempts < max_attempts => {
                        tracing::warn!(
                            mailbox = mutation.mailbox(),
                            attempt = attempts,
                            max_attempts,
                            error = %e,
                            "Transient failure, retrying in {:?}",
                            self.policy.backoff
                        );
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                    class => {
                        let kind = match class {
                            ErrorClass::Transient => FailureKind::TransientExhausted,
                            ErrorClass::Permanent => FailureKind::Permanent,
                        };
                        tracing::warn!(
                            mailbox = mutation.mailbox(),
                            attempts,
                            %kind,
                            error = %e,
                            "Failed to {}",
                            mutation
                        );
                        return MutationResult::Failed {
                            kind,
                            attempts,
                            message: e.to_string(),
                        };
                    }
                },
            }
        }
    }
}

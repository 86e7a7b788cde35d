// SPDX-License-Identifier: MIT

//! Cloud Tasks queueing for asynchronous processing.
//!
//! Webhook handlers must return within the provider's ACK window, so
//! activity fetches run as queue callbacks instead. Backfill is a chain
//! of continue-backfill tasks, one page each, which spreads provider API
//! calls over time and inherits the queue's retry/backoff on rate limits.

use crate::error::AppError;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Payload sent to the activity processing callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessActivityPayload {
    /// Provider activity ID
    pub activity_id: u64,
    /// Provider athlete ID (webhook owner_id)
    pub owner_id: u64,
    pub source: String, // "webhook" or "backfill"
}

/// Payload for the continue-backfill callback. The cursor itself lives in
/// the persisted sync state; the payload only names whose backfill to
/// advance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueBackfillPayload {
    pub user_id: String,
}

/// Cloud Tasks client wrapper.
pub struct TasksService {
    project_id: String,
    location: String,
    queue_name: String,
    /// False for local development and tests: tasks are logged, not sent.
    enabled: bool,
    /// Mock: make every enqueue fail (test builds only).
    #[cfg(test)]
    mock_fail: std::sync::atomic::AtomicBool,
}

impl TasksService {
    pub fn new(project_id: &str, region: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            location: region.to_string(),
            queue_name: crate::config::ACTIVITY_QUEUE_NAME.to_string(),
            enabled: true,
            #[cfg(test)]
            mock_fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// A no-op queue for tests and local development without GCP access.
    pub fn noop() -> Self {
        Self {
            project_id: "local".to_string(),
            location: "local".to_string(),
            queue_name: crate::config::ACTIVITY_QUEUE_NAME.to_string(),
            enabled: false,
            #[cfg(test)]
            mock_fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make every subsequent enqueue fail (test builds only).
    ///
    /// Lets tests drive the failure paths of callers that queue tasks.
    #[cfg(test)]
    pub fn set_mock_fail(&self, fail: bool) {
        self.mock_fail
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Queue a single activity for processing.
    pub async fn queue_activity(
        &self,
        service_url: &str,
        payload: ProcessActivityPayload,
    ) -> Result<()> {
        self.queue_task(service_url, "/tasks/process-activity", &payload)
            .await
    }

    /// Queue the next backfill page for a user.
    pub async fn queue_continue_backfill(
        &self,
        service_url: &str,
        payload: ContinueBackfillPayload,
    ) -> Result<()> {
        self.queue_task(service_url, "/tasks/continue-backfill", &payload)
            .await
    }

    /// Generic task queuing helper.
    async fn queue_task<T: Serialize>(
        &self,
        service_url: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<()> {
        #[cfg(test)]
        if self.mock_fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("mock enqueue failure")));
        }

        if !self.enabled {
            tracing::debug!(endpoint, "Task queue disabled, dropping task");
            return Ok(());
        }

        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let queue_path = format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        );

        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        let http_request = HttpRequest::default()
            .set_url(format!("{}{}", service_url, endpoint))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(std::collections::HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(format!(
                        "fitledger-api@{}.iam.gserviceaccount.com",
                        self.project_id
                    ))
                    .set_audience(service_url.to_string()),
            );

        let task = Task::default().set_http_request(http_request);

        let _response = client
            .create_task()
            .set_parent(queue_path)
            .set_task(task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_queue_accepts_tasks_without_gcp() {
        let service = TasksService::noop();

        service
            .queue_activity(
                "http://localhost",
                ProcessActivityPayload {
                    activity_id: 42,
                    owner_id: 7,
                    source: "webhook".to_string(),
                },
            )
            .await
            .unwrap();

        service
            .queue_continue_backfill(
                "http://localhost",
                ContinueBackfillPayload {
                    user_id: "u1".to_string(),
                },
            )
            .await
            .unwrap();
    }
}

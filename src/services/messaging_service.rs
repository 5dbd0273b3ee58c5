// src/services/messaging_service.rs
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::notification::{DispatchReport, HandleDelivery, NotificationMessage},
    services::google_auth::AccessTokenSource,
};

/// Handles sent concurrently before the next group starts. Same cap as the
/// Admin SDK multicast.
pub const FCM_MAX_BATCH: usize = 500;

pub const DEFAULT_FCM_BASE_URL: &str = "https://fcm.googleapis.com";
pub const DEFAULT_ANDROID_CHANNEL: &str = "taxi_app_channel";

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub fcm_base_url: String,
    pub android_channel_id: String,
    pub batch_size: usize,
}

impl FcmConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            fcm_base_url: DEFAULT_FCM_BASE_URL.to_string(),
            android_channel_id: DEFAULT_ANDROID_CHANNEL.to_string(),
            batch_size: FCM_MAX_BATCH,
        }
    }

    /// HTTP v1 send endpoint for the project.
    pub fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.fcm_base_url.trim_end_matches('/'),
            self.project_id
        )
    }
}

/// Delivers one composed notification to a batch of push handles.
///
/// Implementations must not call the provider for an empty batch and must
/// keep going when individual handles fail. There is no retry.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn dispatch(&self, handles: &[String], message: &NotificationMessage) -> Result<DispatchReport, AppError>;
}

/// FCM HTTP v1 client. v1 takes one token per request, so a dispatch fans out
/// over the handles in groups of `batch_size`.
pub struct FcmNotificationService {
    config: FcmConfig,
    client: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FcmNotificationService {
    pub fn new(config: FcmConfig, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            tokens,
        }
    }

    fn build_payload(&self, handle: &str, message: &NotificationMessage) -> Value {
        json!({
            "message": {
                "token": handle,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
                "data": message.data,
                "android": {
                    "priority": "HIGH",
                    "notification": {
                        "channel_id": self.config.android_channel_id,
                        "sound": "default",
                    },
                },
            }
        })
    }

    async fn send_one(&self, url: &str, bearer: &str, handle: &str, message: &NotificationMessage) -> HandleDelivery {
        let response = match self.client
            .post(url)
            .bearer_auth(bearer)
            .json(&self.build_payload(handle, message))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return HandleDelivery::failed(handle, AppError::from(e).to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return HandleDelivery::failed(handle, classify_failure(status.as_u16(), &error_text).to_string());
        }

        match response.json::<SendResponse>().await {
            Ok(sent) => HandleDelivery::delivered(handle, Some(sent.name)),
            Err(e) => HandleDelivery::failed(handle, AppError::from(e).to_string()),
        }
    }

    async fn send_batch(&self, url: &str, batch: &[String], message: &NotificationMessage) -> Vec<HandleDelivery> {
        let bearer = match self.tokens.access_token().await {
            Ok(bearer) => bearer,
            Err(e) => {
                tracing::error!("No FCM access token: {}", e);
                return fail_all(batch, &e.to_string());
            }
        };

        join_all(batch.iter().map(|handle| self.send_one(url, &bearer, handle, message))).await
    }
}

#[async_trait]
impl NotificationService for FcmNotificationService {
    async fn dispatch(&self, handles: &[String], message: &NotificationMessage) -> Result<DispatchReport, AppError> {
        if handles.is_empty() {
            tracing::warn!("No push handles for '{}', nothing sent", message.title);
            return Ok(DispatchReport::empty(message.notification_type));
        }

        let url = self.config.send_url();
        let mut deliveries = Vec::with_capacity(handles.len());
        for batch in handles.chunks(self.config.batch_size.max(1)) {
            deliveries.extend(self.send_batch(&url, batch, message).await);
        }

        let report = DispatchReport::new(message.notification_type, deliveries);
        log_report(&report);
        Ok(report)
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
}

/// Map a rejected v1 send to an error. FCM puts its own code in `details`,
/// falling back to the canonical gRPC status.
pub(crate) fn classify_failure(status: u16, body: &str) -> AppError {
    let parsed = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_default();
    let code = parsed
        .details
        .iter()
        .find_map(|d| d.error_code.clone())
        .unwrap_or(parsed.status);
    let detail = if parsed.message.is_empty() { body.to_string() } else { parsed.message };

    match (status, code.as_str()) {
        (429, _) | (_, "QUOTA_EXCEEDED") | (_, "RESOURCE_EXHAUSTED") => AppError::FcmQuotaExceeded,
        (_, "UNREGISTERED") | (_, "INVALID_ARGUMENT") | (404, _) => {
            AppError::FcmInvalidToken(format!("{}: {}", code, detail))
        }
        (401, _) | (403, _) | (_, "SENDER_ID_MISMATCH") | (_, "THIRD_PARTY_AUTH_ERROR") => {
            AppError::FcmAuth(format!("{}: {}", status, detail))
        }
        _ => AppError::FcmDelivery(format!("{}: {}", status, detail)),
    }
}

fn fail_all(batch: &[String], reason: &str) -> Vec<HandleDelivery> {
    batch.iter().map(|handle| HandleDelivery::failed(handle, reason)).collect()
}

fn log_report(report: &DispatchReport) {
    tracing::info!(
        "FCM dispatch {} ({}): {} delivered, {} failed",
        report.id,
        report.notification_type,
        report.success_count(),
        report.failure_count()
    );
    for (idx, failure) in report.failures().enumerate() {
        tracing::error!("Push to handle #{} failed: {:?}", idx, failure.outcome);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub handles: Vec<String>,
    pub message: NotificationMessage,
}

// Mock service for development and testing
#[derive(Debug, Default)]
pub struct MockNotificationService {
    sent: Mutex<Vec<SentNotification>>,
    failing_handles: HashSet<String>,
}

impl MockNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report these handles as failed instead of delivered.
    pub fn failing(handles: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing_handles: handles.iter().map(|h| h.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationService for MockNotificationService {
    async fn dispatch(&self, handles: &[String], message: &NotificationMessage) -> Result<DispatchReport, AppError> {
        if handles.is_empty() {
            tracing::info!("[MOCK] No handles for '{}', skipping", message.title);
            return Ok(DispatchReport::empty(message.notification_type));
        }

        tracing::info!("[MOCK] Would send to {} handles: {} - {}",
            handles.len(), message.title, message.body);

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                handles: handles.to_vec(),
                message: message.clone(),
            });
        }

        let deliveries = handles
            .iter()
            .map(|handle| {
                if self.failing_handles.contains(handle) {
                    HandleDelivery::failed(handle, "mock failure")
                } else {
                    HandleDelivery::delivered(handle, None)
                }
            })
            .collect();

        Ok(DispatchReport::new(message.notification_type, deliveries))
    }
}

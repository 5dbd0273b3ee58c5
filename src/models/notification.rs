// src/models/notification.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::utils::id_generator::{IdGenerator, IdType};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewTripRequest,   // "Ana requests a trip from ..." (drivers)
    TripAccepted,     // "Luis accepted your trip ..." (passenger)
    DriverArrived,    // "Luis is waiting at the pickup point"
    TripStarted,      // "En route to ..."
    TripCompleted,    // "You arrived. Amount: S/ 7.00"
    TripCancelled,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewTripRequest => "new_trip_request",
            NotificationType::TripAccepted => "trip_accepted",
            NotificationType::DriverArrived => "driver_arrived",
            NotificationType::TripStarted => "trip_started",
            NotificationType::TripCompleted => "trip_completed",
            NotificationType::TripCancelled => "trip_cancelled",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub notification_type: NotificationType,
    /// Free-form payload. FCM only accepts string values here.
    pub data: HashMap<String, String>,
}

// Helper functions for creating notifications
impl NotificationMessage {
    pub fn new(title: &str, body: impl Into<String>, notification_type: NotificationType) -> Self {
        let mut data = HashMap::new();
        data.insert("type".to_string(), notification_type.as_str().to_string());

        Self {
            title: title.to_string(),
            body: body.into(),
            notification_type,
            data,
        }
    }

    pub fn for_trip(mut self, trip_id: &str) -> Self {
        self.data.insert("tripId".to_string(), trip_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { message_id: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandleDelivery {
    pub handle: String,
    pub outcome: DeliveryOutcome,
}

impl HandleDelivery {
    pub fn delivered(handle: &str, message_id: Option<String>) -> Self {
        Self {
            handle: handle.to_string(),
            outcome: DeliveryOutcome::Delivered { message_id },
        }
    }

    pub fn failed(handle: &str, reason: impl Into<String>) -> Self {
        Self {
            handle: handle.to_string(),
            outcome: DeliveryOutcome::Failed { reason: reason.into() },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

/// Per-handle result of one dispatch call.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub id: String,
    pub notification_type: NotificationType,
    pub deliveries: Vec<HandleDelivery>,
    pub sent_at: DateTime<Utc>,
}

impl DispatchReport {
    pub fn new(notification_type: NotificationType, deliveries: Vec<HandleDelivery>) -> Self {
        Self {
            id: IdGenerator::generate(IdType::Dispatch),
            notification_type,
            deliveries,
            sent_at: Utc::now(),
        }
    }

    pub fn empty(notification_type: NotificationType) -> Self {
        Self::new(notification_type, Vec::new())
    }

    pub fn success_count(&self) -> usize {
        self.deliveries.iter().filter(|d| d.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.deliveries.len() - self.success_count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandleDelivery> {
        self.deliveries.iter().filter(|d| !d.is_success())
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

// src/models/trip.rs
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Pending,     // Waiting for a driver to accept
    Accepted,    // Driver assigned and on the way
    Arrived,     // Driver waiting at the pickup point
    InProgress,  // Passenger on board
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,     // Anything the ride-matching side writes that we don't know about
}

impl TripStatus {
    /// Statuses in which the assigned driver counts as busy.
    pub const ACTIVE: [TripStatus; 3] = [
        TripStatus::Accepted,
        TripStatus::Arrived,
        TripStatus::InProgress,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Pending => "pending",
            TripStatus::Accepted => "accepted",
            TripStatus::Arrived => "arrived",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
            TripStatus::Unknown => "unknown",
        }
    }
}

impl Default for TripStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trip document as written by the ride-matching system.
///
/// The id is the document key, not a field, so it is filled in by the store
/// after deserialization.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub status: TripStatus,
    pub passenger_id: Option<String>,
    pub driver_id: Option<String>,
    pub passenger_name: Option<String>,
    pub pickup_address: Option<String>,
    pub destination_address: Option<String>,
    pub driver_name: Option<String>,
    pub fare: Option<f64>,
    pub cancellation_reason: Option<String>,
}

impl Trip {
    pub fn new(id: impl Into<String>, status: TripStatus) -> Self {
        Self {
            id: id.into(),
            status,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// The driver this trip keeps busy, if any.
    pub fn busy_driver_id(&self) -> Option<&str> {
        if !self.status.is_active() {
            return None;
        }
        self.driver_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trip_from_document() {
        let trip: Trip = serde_json::from_value(json!({
            "status": "in_progress",
            "passengerId": "p1",
            "driverId": "d1",
            "passengerName": "Ana",
            "pickupAddress": "Av. Sol 123",
            "destinationAddress": "Plaza de Armas",
            "driverName": "Luis",
            "fare": 12.5,
            "createdAt": 1700000000
        }))
        .unwrap();

        assert_eq!(trip.status, TripStatus::InProgress);
        assert_eq!(trip.passenger_id.as_deref(), Some("p1"));
        assert_eq!(trip.fare, Some(12.5));
        assert_eq!(trip.cancellation_reason, None);
        assert!(trip.id.is_empty());
    }

    #[test]
    fn test_unknown_status() {
        let trip: Trip = serde_json::from_value(json!({ "status": "scheduled" })).unwrap();
        assert_eq!(trip.status, TripStatus::Unknown);

        let trip: Trip = serde_json::from_value(json!({})).unwrap();
        assert_eq!(trip.status, TripStatus::Unknown);
    }

    #[test]
    fn test_busy_driver_id() {
        let mut trip = Trip::new("t1", TripStatus::Accepted);
        assert_eq!(trip.busy_driver_id(), None);

        trip.driver_id = Some("d1".to_string());
        assert_eq!(trip.busy_driver_id(), Some("d1"));

        trip.status = TripStatus::Completed;
        assert_eq!(trip.busy_driver_id(), None);

        trip.status = TripStatus::Arrived;
        trip.driver_id = Some(String::new());
        assert_eq!(trip.busy_driver_id(), None);
    }

    #[test]
    fn test_status_names_match_serde() {
        for status in [TripStatus::Pending, TripStatus::InProgress, TripStatus::Cancelled] {
            let value = serde_json::to_value(status).unwrap();
            assert_eq!(value, json!(status.as_str()));
        }
    }
}

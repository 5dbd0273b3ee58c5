// src/services/composer.rs
//! Trip status → notification text. Everything here is pure.

use crate::models::{
    notification::{NotificationMessage, NotificationType},
    trip::{Trip, TripStatus},
};

const CANCELLED_FALLBACK: &str = "The trip has been cancelled";
const DRIVER_FALLBACK: &str = "Your driver";
const PASSENGER_FALLBACK: &str = "A passenger";
const PLACE_FALLBACK: &str = "an unknown address";

/// Message for the passenger after a status change, or `None` when the
/// status did not change or has nothing to tell the passenger.
pub fn compose_status_update(previous: Option<TripStatus>, trip: &Trip) -> Option<NotificationMessage> {
    if previous == Some(trip.status) {
        return None;
    }

    let message = match trip.status {
        TripStatus::Accepted => NotificationMessage::new(
            "Driver assigned!",
            format!("{} accepted your trip and is on the way", driver_name(trip)),
            NotificationType::TripAccepted,
        ),
        TripStatus::Arrived => NotificationMessage::new(
            "Your driver has arrived!",
            format!("{} is waiting at the pickup point", driver_name(trip)),
            NotificationType::DriverArrived,
        ),
        TripStatus::InProgress => NotificationMessage::new(
            "Trip started",
            format!("En route to {}", non_empty(&trip.destination_address).unwrap_or(PLACE_FALLBACK)),
            NotificationType::TripStarted,
        ),
        TripStatus::Completed => NotificationMessage::new(
            "Trip completed!",
            format!("You arrived. Amount: {}", format_fare(trip.fare)),
            NotificationType::TripCompleted,
        ),
        TripStatus::Cancelled => NotificationMessage::new(
            "Trip cancelled",
            non_empty(&trip.cancellation_reason).unwrap_or(CANCELLED_FALLBACK),
            NotificationType::TripCancelled,
        ),
        TripStatus::Pending | TripStatus::Unknown => return None,
    };

    Some(message.for_trip(&trip.id))
}

/// Driver-facing message for a trip that just entered `pending`.
pub fn compose_new_trip_request(trip: &Trip) -> NotificationMessage {
    NotificationMessage::new(
        "New trip request",
        format!(
            "{} requests a trip from {}",
            non_empty(&trip.passenger_name).unwrap_or(PASSENGER_FALLBACK),
            non_empty(&trip.pickup_address).unwrap_or(PLACE_FALLBACK),
        ),
        NotificationType::NewTripRequest,
    )
    .for_trip(&trip.id)
}

/// Fare in soles with two decimals. Missing or nonsensical amounts show as zero.
pub fn format_fare(fare: Option<f64>) -> String {
    let amount = fare.filter(|f| f.is_finite() && *f > 0.0).unwrap_or(0.0);
    format!("S/ {:.2}", amount)
}

fn driver_name(trip: &Trip) -> &str {
    non_empty(&trip.driver_name).unwrap_or(DRIVER_FALLBACK)
}

/// Blank values fall back; anything else is used exactly as stored.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

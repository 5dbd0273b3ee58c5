// src/services/trip_notifier.rs
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowError as AppError,
    models::{change::StatusTransition, notification::DispatchReport, trip::Trip},
    services::{
        composer::{compose_new_trip_request, compose_status_update},
        messaging_service::NotificationService,
        resolver::RecipientResolver,
        trip_store::TripStore,
    },
};

/// Resolve → compose → dispatch for one change event.
///
/// `Ok(None)` means the event was deliberately skipped (nobody to notify or
/// nothing to say).
pub struct TripNotifier {
    resolver: RecipientResolver,
    notification_service: Arc<dyn NotificationService>,
}

impl TripNotifier {
    pub fn new(store: Arc<dyn TripStore>, notification_service: Arc<dyn NotificationService>) -> Self {
        Self {
            resolver: RecipientResolver::new(store),
            notification_service,
        }
    }

    pub async fn notify_new_trip(&self, trip: &Trip) -> Result<Option<DispatchReport>, AppError> {
        let targets = self.resolver.resolve_driver_targets(trip).await?;

        if targets.is_empty() {
            tracing::warn!(
                "No available drivers for trip {} ({} active, {} busy)",
                trip.id,
                targets.active_drivers,
                targets.busy_drivers
            );
            return Ok(None);
        }

        let message = compose_new_trip_request(trip);
        let report = self.notification_service.dispatch(&targets.handles, &message).await?;

        tracing::info!(
            "Trip {} offered to {} available drivers ({} busy)",
            trip.id,
            targets.handles.len(),
            targets.busy_drivers
        );
        Ok(Some(report))
    }

    pub async fn notify_status_change(&self, transition: &StatusTransition) -> Result<Option<DispatchReport>, AppError> {
        let trip = &transition.trip;

        let message = match compose_status_update(transition.previous, trip) {
            Some(message) => message,
            None => {
                tracing::debug!("Trip {} status {} has no passenger notification", trip.id, trip.status);
                return Ok(None);
            }
        };

        let handle = match self.resolver.resolve_passenger_target(trip).await? {
            Some(handle) => handle,
            None => {
                tracing::warn!("Trip {}: passenger has no push handle, skipping '{}'", trip.id, message.title);
                return Ok(None);
            }
        };

        let report = self.notification_service.dispatch(&[handle], &message).await?;
        tracing::info!("Passenger of trip {} notified: {}", trip.id, message.title);
        Ok(Some(report))
    }
}

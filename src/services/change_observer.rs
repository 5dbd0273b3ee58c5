// src/services/change_observer.rs
//! Derives the two subscriptions the notifier cares about from the raw
//! trip change stream.

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing;

use crate::{
    models::{
        change::{ChangeKind, StatusTransition, TripChange},
        trip::{Trip, TripStatus},
    },
    services::trip_store::TripChangeStream,
};

/// Trips entering the `status == pending` query, once per entry.
pub fn pending_trip_added(changes: TripChangeStream) -> BoxStream<'static, Trip> {
    let mut view = PendingView::default();
    changes
        .filter_map(move |change| future::ready(view.apply(change)))
        .boxed()
}

/// Modified trips whose status differs from the last one seen for them.
pub fn trip_status_changed(changes: TripChangeStream) -> BoxStream<'static, StatusTransition> {
    let mut tracker = StatusTracker::default();
    changes
        .filter_map(move |change| future::ready(tracker.apply(change)))
        .boxed()
}

/// Membership of the pending query.
#[derive(Debug, Default)]
pub struct PendingView {
    pending: HashSet<String>,
}

impl PendingView {
    pub fn apply(&mut self, change: TripChange) -> Option<Trip> {
        let trip = match (change.kind, change.trip) {
            (ChangeKind::Removed, _) | (_, None) => {
                self.pending.remove(&change.trip_id);
                return None;
            }
            (_, Some(trip)) => trip,
        };

        if trip.status != TripStatus::Pending {
            self.pending.remove(&change.trip_id);
            return None;
        }

        if self.pending.insert(change.trip_id) {
            tracing::info!("New pending trip detected: {}", trip.id);
            Some(trip)
        } else {
            None
        }
    }
}

/// Last observed status per trip id.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last_seen: HashMap<String, TripStatus>,
}

impl StatusTracker {
    pub fn apply(&mut self, change: TripChange) -> Option<StatusTransition> {
        let trip = match (change.kind, change.trip) {
            (ChangeKind::Removed, _) | (_, None) => {
                self.last_seen.remove(&change.trip_id);
                return None;
            }
            (_, Some(trip)) => trip,
        };

        let previous = self.last_seen.insert(change.trip_id, trip.status);
        // Added only seeds the tracker
        if change.kind == ChangeKind::Added || previous == Some(trip.status) {
            return None;
        }

        tracing::info!(
            "Trip {} status changed: {} -> {}",
            trip.id,
            previous.map(|s| s.as_str()).unwrap_or("unseen"),
            trip.status
        );
        Some(StatusTransition { previous, trip })
    }

    pub fn last_seen(&self, trip_id: &str) -> Option<TripStatus> {
        self.last_seen.get(trip_id).copied()
    }
}

// src/models/change.rs
use serde::Serialize;

use super::trip::{Trip, TripStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One document change on the trips collection.
#[derive(Debug, Clone, PartialEq)]
pub struct TripChange {
    pub trip_id: String,
    pub kind: ChangeKind,
    /// Snapshot after the change. `None` only for removals.
    pub trip: Option<Trip>,
}

impl TripChange {
    pub fn added(trip: Trip) -> Self {
        Self {
            trip_id: trip.id.clone(),
            kind: ChangeKind::Added,
            trip: Some(trip),
        }
    }

    pub fn modified(trip: Trip) -> Self {
        Self {
            trip_id: trip.id.clone(),
            kind: ChangeKind::Modified,
            trip: Some(trip),
        }
    }

    pub fn removed(trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            kind: ChangeKind::Removed,
            trip: None,
        }
    }
}

/// A trip whose status moved away from the last one we saw for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub previous: Option<TripStatus>,
    pub trip: Trip,
}

impl StatusTransition {
    pub fn trip_id(&self) -> &str {
        &self.trip.id
    }

    pub fn current(&self) -> TripStatus {
        self.trip.status
    }
}

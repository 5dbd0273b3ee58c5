// src/services/trip_store.rs
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing;

use crate::{
    errors::SparrowResult,
    models::{
        change::TripChange,
        trip::{Trip, TripStatus},
        user::User,
    },
};

pub type TripChangeStream = BoxStream<'static, TripChange>;

/// Read and watch access to the trip-tracking store.
///
/// Reads are independent of each other: nothing here is transactional.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Users with role=driver and driverStatus=active.
    async fn active_drivers(&self) -> SparrowResult<Vec<User>>;

    /// Trips whose status is one of `statuses`.
    async fn trips_with_status(&self, statuses: &[TripStatus]) -> SparrowResult<Vec<Trip>>;

    async fn get_user(&self, user_id: &str) -> SparrowResult<Option<User>>;

    /// Every change on the trips collection, starting with one `Added` per
    /// trip already present. The stream never restarts; open a new one instead.
    async fn watch_trips(&self) -> SparrowResult<TripChangeStream>;
}

const CHANGE_BUFFER: usize = 256;

/// In-process store for development and testing.
pub struct MemoryTripStore {
    users: RwLock<HashMap<String, User>>,
    trips: RwLock<HashMap<String, Trip>>,
    changes: broadcast::Sender<TripChange>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            users: RwLock::new(HashMap::new()),
            trips: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub async fn put_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    /// Insert or replace a trip and publish the change to watchers.
    pub async fn put_trip(&self, trip: Trip) {
        let mut trips = self.trips.write().await;
        let change = match trips.insert(trip.id.clone(), trip.clone()) {
            Some(previous) if previous == trip => return,
            Some(_) => TripChange::modified(trip),
            None => TripChange::added(trip),
        };
        // Publish while holding the lock so watchers see per-trip order
        let _ = self.changes.send(change);
    }

    /// Apply `update` to a stored trip. Returns false when the trip is unknown.
    pub async fn update_trip<F>(&self, trip_id: &str, update: F) -> bool
    where
        F: FnOnce(&mut Trip),
    {
        let current = self.trips.read().await.get(trip_id).cloned();
        match current {
            Some(mut trip) => {
                update(&mut trip);
                self.put_trip(trip).await;
                true
            }
            None => false,
        }
    }

    pub async fn remove_trip(&self, trip_id: &str) {
        if self.trips.write().await.remove(trip_id).is_some() {
            let _ = self.changes.send(TripChange::removed(trip_id));
        }
    }
}

impl Default for MemoryTripStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn active_drivers(&self) -> SparrowResult<Vec<User>> {
        let users = self.users.read().await;
        Ok(users.values().filter(|u| u.is_active_driver()).cloned().collect())
    }

    async fn trips_with_status(&self, statuses: &[TripStatus]) -> SparrowResult<Vec<Trip>> {
        let trips = self.trips.read().await;
        Ok(trips
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect())
    }

    async fn get_user(&self, user_id: &str) -> SparrowResult<Option<User>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn watch_trips(&self) -> SparrowResult<TripChangeStream> {
        // Subscribe before taking the snapshot so nothing falls in between
        let receiver = self.changes.subscribe();
        let snapshot: Vec<TripChange> = {
            let trips = self.trips.read().await;
            trips.values().cloned().map(TripChange::added).collect()
        };

        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => return Some((change, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Trip watcher lagged, {} changes dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(snapshot).chain(live).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{change::ChangeKind, user::DriverStatus};

    #[tokio::test]
    async fn test_active_drivers_filter() {
        let store = MemoryTripStore::new();
        store.put_user(User::driver("d1", DriverStatus::Active, Some("t1"))).await;
        store.put_user(User::driver("d2", DriverStatus::Inactive, Some("t2"))).await;
        store.put_user(User::passenger("p1", Some("t3"))).await;

        let drivers = store.active_drivers().await.unwrap();
        assert_eq!(drivers.len(), 1);
        assert_eq!(drivers[0].id, "d1");
    }

    #[tokio::test]
    async fn test_trips_with_status() {
        let store = MemoryTripStore::new();
        store.put_trip(Trip::new("a", TripStatus::Accepted)).await;
        store.put_trip(Trip::new("b", TripStatus::Pending)).await;
        store.put_trip(Trip::new("c", TripStatus::InProgress)).await;

        let mut ids: Vec<String> = store
            .trips_with_status(&TripStatus::ACTIVE)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_watch_replays_then_follows() {
        let store = MemoryTripStore::new();
        store.put_trip(Trip::new("a", TripStatus::Pending)).await;

        let mut changes = store.watch_trips().await.unwrap();
        let first = changes.next().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.trip_id, "a");

        assert!(store.update_trip("a", |t| t.status = TripStatus::Accepted).await);
        let second = changes.next().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Modified);
        assert_eq!(second.trip.unwrap().status, TripStatus::Accepted);

        store.remove_trip("a").await;
        let third = changes.next().await.unwrap();
        assert_eq!(third.kind, ChangeKind::Removed);
        assert!(third.trip.is_none());
    }

    #[tokio::test]
    async fn test_identical_put_is_silent() {
        let store = MemoryTripStore::new();
        let mut changes = store.watch_trips().await.unwrap();

        store.put_trip(Trip::new("a", TripStatus::Pending)).await;
        store.put_trip(Trip::new("a", TripStatus::Pending)).await;
        store.put_trip(Trip::new("b", TripStatus::Pending)).await;

        assert_eq!(changes.next().await.unwrap().trip_id, "a");
        assert_eq!(changes.next().await.unwrap().trip_id, "b");
    }

    #[tokio::test]
    async fn test_update_unknown_trip() {
        let store = MemoryTripStore::new();
        assert!(!store.update_trip("missing", |t| t.fare = Some(1.0)).await);
    }
}

// src/services/resolver.rs
use std::collections::HashSet;
use std::sync::Arc;
use tracing;

use crate::{
    errors::SparrowResult,
    models::{
        trip::{Trip, TripStatus},
        user::User,
    },
    services::trip_store::TripStore,
};

/// Drivers selected for a new-trip broadcast, plus the numbers behind the choice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DriverTargets {
    pub handles: Vec<String>,
    pub active_drivers: usize,
    pub busy_drivers: usize,
}

impl DriverTargets {
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Works out who should hear about a trip event.
///
/// Stateless; every call reads the store fresh.
pub struct RecipientResolver {
    store: Arc<dyn TripStore>,
}

impl RecipientResolver {
    pub fn new(store: Arc<dyn TripStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_driver_targets(&self, trip: &Trip) -> SparrowResult<DriverTargets> {
        // Two separate reads. A driver accepting a ride in between gets at
        // most one stale offer.
        let drivers = self.store.active_drivers().await?;
        let active_trips = self.store.trips_with_status(&TripStatus::ACTIVE).await?;

        let busy = busy_driver_ids(&active_trips);
        let handles = available_driver_handles(&drivers, &busy);

        tracing::debug!(
            "Trip {}: {} active drivers, {} busy, {} reachable",
            trip.id,
            drivers.len(),
            busy.len(),
            handles.len()
        );

        Ok(DriverTargets {
            handles,
            active_drivers: drivers.len(),
            busy_drivers: busy.len(),
        })
    }

    /// The passenger's push handle, or `None` when there is nobody to reach.
    pub async fn resolve_passenger_target(&self, trip: &Trip) -> SparrowResult<Option<String>> {
        let passenger_id = match trip.passenger_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                tracing::debug!("Trip {} has no passenger id", trip.id);
                return Ok(None);
            }
        };

        match self.store.get_user(passenger_id).await? {
            Some(user) => Ok(user.push_handle().map(str::to_string)),
            None => {
                tracing::warn!("Passenger {} of trip {} not found", passenger_id, trip.id);
                Ok(None)
            }
        }
    }
}

/// Ids of drivers tied up in an accepted, arrived or in-progress trip.
pub fn busy_driver_ids(trips: &[Trip]) -> HashSet<String> {
    trips
        .iter()
        .filter_map(|trip| trip.busy_driver_id())
        .map(str::to_string)
        .collect()
}

/// Push handles of active drivers that are not busy. Drivers without a
/// handle are left out. Order follows `drivers`; duplicates are kept.
pub fn available_driver_handles(drivers: &[User], busy: &HashSet<String>) -> Vec<String> {
    drivers
        .iter()
        .filter(|driver| driver.is_active_driver() && !busy.contains(&driver.id))
        .filter_map(|driver| driver.push_handle())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::DriverStatus;
    use crate::services::trip_store::MemoryTripStore;

    fn assigned(id: &str, status: TripStatus, driver: Option<&str>) -> Trip {
        let mut trip = Trip::new(id, status);
        trip.driver_id = driver.map(str::to_string);
        trip
    }

    #[test]
    fn test_busy_ids_ignore_unassigned_and_inactive() {
        let trips = vec![
            assigned("t1", TripStatus::Accepted, Some("d1")),
            assigned("t2", TripStatus::InProgress, None),
            assigned("t3", TripStatus::Completed, Some("d2")),
            assigned("t4", TripStatus::Arrived, Some("d3")),
        ];

        let busy = busy_driver_ids(&trips);
        assert_eq!(busy.len(), 2);
        assert!(busy.contains("d1"));
        assert!(busy.contains("d3"));
    }

    #[test]
    fn test_available_is_set_difference() {
        let drivers = vec![
            User::driver("d1", DriverStatus::Active, Some("tok-1")),
            User::driver("d2", DriverStatus::Active, Some("tok-2")),
            User::driver("d3", DriverStatus::Active, None),
            User::driver("d4", DriverStatus::Active, Some("tok-4")),
        ];
        let busy: HashSet<String> = ["d2".to_string()].into_iter().collect();

        let handles = available_driver_handles(&drivers, &busy);
        assert_eq!(handles, vec!["tok-1", "tok-4"]);

        for driver in &drivers {
            let expected = !busy.contains(&driver.id) && driver.push_handle().is_some();
            let included = driver.push_handle().is_some_and(|h| handles.iter().any(|x| x == h));
            assert_eq!(expected, included, "driver {}", driver.id);
        }
    }

    #[test]
    fn test_duplicate_handles_are_kept() {
        let drivers = vec![
            User::driver("d1", DriverStatus::Active, Some("shared")),
            User::driver("d2", DriverStatus::Active, Some("shared")),
        ];
        assert_eq!(available_driver_handles(&drivers, &HashSet::new()).len(), 2);
    }

    #[tokio::test]
    async fn test_all_busy_yields_empty() {
        let store = Arc::new(MemoryTripStore::new());
        store.put_user(User::driver("d1", DriverStatus::Active, Some("tok-1"))).await;
        store.put_user(User::driver("d2", DriverStatus::Active, None)).await;
        store.put_trip(assigned("t1", TripStatus::Accepted, Some("d1"))).await;

        let resolver = RecipientResolver::new(store);
        let targets = resolver
            .resolve_driver_targets(&Trip::new("new", TripStatus::Pending))
            .await
            .unwrap();

        assert!(targets.is_empty());
        assert_eq!(targets.active_drivers, 2);
        assert_eq!(targets.busy_drivers, 1);
    }

    #[tokio::test]
    async fn test_inactive_drivers_never_targeted() {
        let store = Arc::new(MemoryTripStore::new());
        store.put_user(User::driver("d1", DriverStatus::Inactive, Some("tok-1"))).await;
        store.put_user(User::driver("d2", DriverStatus::Active, Some("tok-2"))).await;

        let resolver = RecipientResolver::new(store);
        let targets = resolver
            .resolve_driver_targets(&Trip::new("new", TripStatus::Pending))
            .await
            .unwrap();

        assert_eq!(targets.handles, vec!["tok-2"]);
    }

    #[tokio::test]
    async fn test_passenger_target() {
        let store = Arc::new(MemoryTripStore::new());
        store.put_user(User::passenger("p1", Some("tok-p1"))).await;
        store.put_user(User::passenger("p2", None)).await;
        let resolver = RecipientResolver::new(store);

        let mut trip = Trip::new("t1", TripStatus::Accepted);
        assert_eq!(resolver.resolve_passenger_target(&trip).await.unwrap(), None);

        trip.passenger_id = Some("p1".to_string());
        assert_eq!(
            resolver.resolve_passenger_target(&trip).await.unwrap().as_deref(),
            Some("tok-p1")
        );

        trip.passenger_id = Some("p2".to_string());
        assert_eq!(resolver.resolve_passenger_target(&trip).await.unwrap(), None);

        trip.passenger_id = Some("ghost".to_string());
        assert_eq!(resolver.resolve_passenger_target(&trip).await.unwrap(), None);
    }
}

// src/services/listener_service.rs
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{self, Instrument};

use crate::{
    errors::{SparrowError, SparrowResult},
    models::{change::StatusTransition, notification::DispatchReport, trip::Trip},
    services::{
        change_observer::{pending_trip_added, trip_status_changed},
        trip_notifier::TripNotifier,
        trip_store::TripStore,
    },
    utils::id_generator::generate_event_id,
};

/// The two running subscription loops.
pub struct ListenerService {
    pending_loop: JoinHandle<()>,
    status_loop: JoinHandle<()>,
}

impl ListenerService {
    /// Open both watches and start consuming them. Each event runs in its
    /// own task; events for the same trip run one after another, in arrival
    /// order.
    pub async fn start(store: Arc<dyn TripStore>, notifier: Arc<TripNotifier>) -> SparrowResult<Self> {
        tracing::info!("Starting trip listeners...");

        let pending = pending_trip_added(store.watch_trips().await?);
        let statuses = trip_status_changed(store.watch_trips().await?);

        let pending_loop = {
            let notifier = notifier.clone();
            tokio::spawn(run_loop("pending-trips", pending, |trip: &Trip| trip.id.clone(), move |trip| {
                let notifier = notifier.clone();
                async move { notifier.notify_new_trip(&trip).await }
            }))
        };

        let status_loop = tokio::spawn(run_loop(
            "trip-status",
            statuses,
            |transition: &StatusTransition| transition.trip_id().to_string(),
            move |transition| {
                let notifier = notifier.clone();
                async move { notifier.notify_status_change(&transition).await }
            },
        ));

        tracing::info!("Trip listeners started");
        Ok(Self { pending_loop, status_loop })
    }

    pub fn is_running(&self) -> bool {
        !self.pending_loop.is_finished() && !self.status_loop.is_finished()
    }

    pub fn stop(&self) {
        self.pending_loop.abort();
        self.status_loop.abort();
    }
}

impl Drop for ListenerService {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<T, K, F, Fut>(name: &'static str, mut events: BoxStream<'static, T>, key: K, handler: F)
where
    T: Send + 'static,
    K: Fn(&T) -> String + Send + 'static,
    F: Fn(T) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<DispatchReport>, SparrowError>> + Send + 'static,
{
    // Latest task per trip; the trip's next event waits for it
    let mut tails: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(event) = events.next().await {
        let trip_id = key(&event);
        let span = tracing::info_span!("event", listener = name, trip = %trip_id, id = %generate_event_id());
        let work = handler(event);

        tails.retain(|_, task| !task.is_finished());
        let previous = tails.remove(&trip_id);

        let task = tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    // Err only when the earlier event panicked or was aborted
                    let _ = previous.await;
                }
                match work.await {
                    Ok(_) => {}
                    Err(e) if e.is_lookup_failure() => tracing::warn!("Event skipped: {}", e),
                    Err(e) => tracing::error!("Event failed: {}", e),
                }
            }
            .instrument(span),
        );
        tails.insert(trip_id, task);
    }
    tracing::warn!("Listener '{}' stream ended", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        notification::NotificationType,
        trip::TripStatus,
        user::{DriverStatus, User},
    };
    use crate::services::{
        messaging_service::{MockNotificationService, SentNotification},
        trip_notifier::TripNotifier,
        trip_store::{MemoryTripStore, TripChangeStream},
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Memory store whose first user lookup is slow.
    struct SlowFirstLookup {
        inner: Arc<MemoryTripStore>,
        slowed: AtomicBool,
    }

    #[async_trait]
    impl TripStore for SlowFirstLookup {
        async fn active_drivers(&self) -> SparrowResult<Vec<User>> {
            self.inner.active_drivers().await
        }

        async fn trips_with_status(&self, statuses: &[TripStatus]) -> SparrowResult<Vec<Trip>> {
            self.inner.trips_with_status(statuses).await
        }

        async fn get_user(&self, user_id: &str) -> SparrowResult<Option<User>> {
            if !self.slowed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            self.inner.get_user(user_id).await
        }

        async fn watch_trips(&self) -> SparrowResult<TripChangeStream> {
            self.inner.watch_trips().await
        }
    }

    async fn start() -> (Arc<MemoryTripStore>, Arc<MockNotificationService>, ListenerService) {
        let inner = Arc::new(MemoryTripStore::new());
        inner.put_user(User::passenger("p1", Some("tok-p1"))).await;
        inner.put_user(User::passenger("p2", Some("tok-p2"))).await;
        inner.put_user(User::driver("d1", DriverStatus::Active, Some("tok-d1"))).await;

        let store: Arc<dyn TripStore> = Arc::new(SlowFirstLookup {
            inner: inner.clone(),
            slowed: AtomicBool::new(false),
        });
        let push = Arc::new(MockNotificationService::new());
        let notifier = Arc::new(TripNotifier::new(store.clone(), push.clone()));
        let listeners = ListenerService::start(store, notifier).await.unwrap();
        (inner, push, listeners)
    }

    fn ride(id: &str, passenger: &str, status: TripStatus) -> Trip {
        let mut trip = Trip::new(id, status);
        trip.passenger_id = Some(passenger.to_string());
        trip.driver_name = Some("Luis".to_string());
        trip
    }

    fn passenger_updates(push: &MockNotificationService) -> Vec<SentNotification> {
        push.sent()
            .into_iter()
            .filter(|s| s.message.notification_type != NotificationType::NewTripRequest)
            .collect()
    }

    async fn wait_for_updates(push: &MockNotificationService, count: usize) -> Vec<SentNotification> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = passenger_updates(push);
            if sent.len() >= count {
                return sent;
            }
            assert!(tokio::time::Instant::now() < deadline, "only {} updates sent", sent.len());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_same_trip_updates_arrive_in_order() {
        let (store, push, listeners) = start().await;

        store.put_trip(ride("t1", "p1", TripStatus::Pending)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.update_trip("t1", |t| t.status = TripStatus::Accepted).await;
        store.update_trip("t1", |t| t.status = TripStatus::Arrived).await;

        let sent = wait_for_updates(&push, 2).await;
        let types: Vec<NotificationType> = sent.iter().map(|s| s.message.notification_type).collect();
        assert_eq!(types, vec![NotificationType::TripAccepted, NotificationType::DriverArrived]);

        listeners.stop();
    }

    #[tokio::test]
    async fn test_slow_trip_does_not_hold_back_others() {
        let (store, push, listeners) = start().await;

        store.put_trip(ride("t1", "p1", TripStatus::Accepted)).await;
        store.put_trip(ride("t2", "p2", TripStatus::Accepted)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.update_trip("t1", |t| t.status = TripStatus::Arrived).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.update_trip("t2", |t| t.status = TripStatus::Arrived).await;

        let sent = wait_for_updates(&push, 2).await;
        let handles: Vec<&str> = sent.iter().map(|s| s.handles[0].as_str()).collect();
        assert_eq!(handles, vec!["tok-p2", "tok-p1"]);

        listeners.stop();
    }

}

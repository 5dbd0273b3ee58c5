// src/services/firebase_store.rs
//! Trip store backed by the Firebase Realtime Database.
//!
//! Reads are plain REST `GET`s with `orderBy`/`equalTo` queries. The watch
//! rides on firebase-rs realtime events for `trips`; its `put`/`patch`
//! events are applied to a local mirror of the collection, and the mirror
//! decides whether a trip was added, modified or removed.

use async_trait::async_trait;
use firebase_rs::Firebase;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing;

use crate::{
    errors::{SparrowError, SparrowResult},
    models::{
        change::TripChange,
        trip::{Trip, TripStatus},
        user::User,
    },
    services::trip_store::{TripChangeStream, TripStore},
};

const TRIPS: &str = "trips";
const USERS: &str = "users";
const CHANGE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub database_url: String,
    /// Database secret or ID token, sent as the `auth` query parameter.
    pub auth_token: Option<String>,
    pub reconnect_delay: Duration,
}

impl FirebaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: None,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url.trim_end_matches('/'), path)
    }
}

pub struct FirebaseTripStore {
    config: FirebaseConfig,
    client: reqwest::Client,
}

impl FirebaseTripStore {
    pub fn new(config: FirebaseConfig) -> SparrowResult<Self> {
        trips_handle(&config)?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> SparrowResult<Value> {
        let mut request = self.client.get(self.config.url(path)).query(query);
        if let Some(auth) = &self.config.auth_token {
            request = request.query(&[("auth", auth)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SparrowError::FirebaseDatabase(format!("GET {} failed ({}): {}", path, status, error_text)));
        }

        Ok(response.json::<Value>().await?)
    }

    /// Children of `collection` whose `field` equals `value`.
    async fn query_equal<T>(&self, collection: &str, field: &str, value: &str) -> SparrowResult<Vec<(String, T)>>
    where
        T: DeserializeOwned,
    {
        let query = [
            ("orderBy", format!("\"{}\"", field)),
            ("equalTo", format!("\"{}\"", value)),
        ];
        let body = self.get_json(collection, &query).await?;
        Ok(decode_children(collection, body))
    }
}

#[async_trait]
impl TripStore for FirebaseTripStore {
    async fn active_drivers(&self) -> SparrowResult<Vec<User>> {
        // One orderBy per query: filter driverStatus here
        let drivers = self.query_equal::<User>(USERS, "role", "driver").await?;
        Ok(drivers
            .into_iter()
            .map(|(id, user)| user.with_id(id))
            .filter(User::is_active_driver)
            .collect())
    }

    async fn trips_with_status(&self, statuses: &[TripStatus]) -> SparrowResult<Vec<Trip>> {
        let mut trips = Vec::new();
        for status in statuses {
            let found = self.query_equal::<Trip>(TRIPS, "status", status.as_str()).await?;
            trips.extend(found.into_iter().map(|(id, trip)| trip.with_id(id)));
        }
        Ok(trips)
    }

    async fn get_user(&self, user_id: &str) -> SparrowResult<Option<User>> {
        let body = self.get_json(&format!("{}/{}", USERS, user_id), &[]).await?;
        decode_user(user_id, body)
    }

    async fn watch_trips(&self) -> SparrowResult<TripChangeStream> {
        // First event inline so bad URLs or credentials surface to the caller
        let mut events = realtime_events(&self.config)?;
        let first = match events.next().await {
            Some(event) => event?,
            None => return Err(SparrowError::FirebaseDatabase(format!("watch on {} closed at once", TRIPS))),
        };
        let events = stream::iter([Ok(first)]).chain(events).boxed();
        let (sender, receiver) = mpsc::channel(CHANGE_BUFFER);

        tokio::spawn(watch_loop(self.config.clone(), events, sender));

        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|change| (change, receiver))
        })
        .boxed())
    }
}

/// A user record that does not decode is a failed read, like any other
/// store error.
fn decode_user(user_id: &str, body: Value) -> SparrowResult<Option<User>> {
    if body.is_null() {
        return Ok(None);
    }
    serde_json::from_value::<User>(body)
        .map(|user| Some(user.with_id(user_id)))
        .map_err(|e| SparrowError::FirebaseDatabase(format!("{}/{} is malformed: {}", USERS, user_id, e)))
}

fn decode_children<T: DeserializeOwned>(collection: &str, body: Value) -> Vec<(String, T)> {
    let children = match body {
        Value::Object(children) => children,
        Value::Null => return Vec::new(),
        other => {
            tracing::warn!("Unexpected shape for {}: {}", collection, other);
            return Vec::new();
        }
    };

    children
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value::<T>(value) {
            Ok(item) => Some((id, item)),
            Err(e) => {
                tracing::warn!("Skipping malformed {}/{}: {}", collection, id, e);
                None
            }
        })
        .collect()
}

/// `(event name, data)` pairs from the realtime events endpoint. `null`
/// data arrives as `None`.
type RealtimeEvents = BoxStream<'static, SparrowResult<(String, Option<String>)>>;

fn trips_handle(config: &FirebaseConfig) -> SparrowResult<Firebase> {
    let root = match &config.auth_token {
        Some(token) => Firebase::auth(&config.database_url, token),
        None => Firebase::new(&config.database_url),
    }
    .map_err(|e| SparrowError::InvalidUrl(format!("{}: {}", config.database_url, e)))?;
    Ok(root.at(TRIPS))
}

/// Nothing connects until the stream is polled.
fn realtime_events(config: &FirebaseConfig) -> SparrowResult<RealtimeEvents> {
    let events = trips_handle(config)?
        .with_realtime_events()
        .ok_or_else(|| SparrowError::FirebaseDatabase(format!("cannot watch {} at {}", TRIPS, config.database_url)))?;

    Ok(events
        .stream(false)
        .map(|event| event.map_err(|e| SparrowError::FirebaseDatabase(format!("trip watch: {}", e))))
        .boxed())
}

async fn watch_loop(config: FirebaseConfig, mut events: RealtimeEvents, sender: mpsc::Sender<TripChange>) {
    let mut mirror = TripMirror::default();

    loop {
        match pump(&mut mirror, &mut events, &sender).await {
            Ok(()) => tracing::warn!("Trip watch stream ended, reconnecting"),
            Err(SparrowError::ChannelClosed) => {
                tracing::debug!("Trip watch dropped by consumer");
                return;
            }
            Err(e) => tracing::warn!("Trip watch interrupted: {}", e),
        }

        events = loop {
            if sender.is_closed() {
                return;
            }
            tokio::time::sleep(config.reconnect_delay).await;
            match realtime_events(&config) {
                Ok(events) => break events,
                Err(e) => tracing::warn!("Trip watch reconnect failed: {}", e),
            }
        };
        tracing::info!("Trip watch reconnecting");
    }
}

async fn pump(
    mirror: &mut TripMirror,
    events: &mut RealtimeEvents,
    sender: &mpsc::Sender<TripChange>,
) -> SparrowResult<()> {
    while let Some(event) = events.next().await {
        let (name, data) = event?;
        let event = match StreamEvent::parse(&name, data.as_deref()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Ignoring malformed '{}' event: {}", name, e);
                continue;
            }
        };

        match event {
            StreamEvent::Put { path, data } => {
                for change in mirror.apply_put(&path, data) {
                    sender.send(change).await.map_err(|_| SparrowError::ChannelClosed)?;
                }
            }
            StreamEvent::Patch { path, data } => {
                for change in mirror.apply_patch(&path, data) {
                    sender.send(change).await.map_err(|_| SparrowError::ChannelClosed)?;
                }
            }
            StreamEvent::Cancel(reason) => {
                return Err(SparrowError::FirebaseDatabase(format!("watch cancelled: {}", reason)));
            }
            StreamEvent::AuthRevoked => {
                return Err(SparrowError::FirebaseDatabase("watch credentials revoked".to_string()));
            }
            StreamEvent::Other(name) => tracing::debug!("Ignoring '{}' event", name),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    Cancel(String),
    AuthRevoked,
    Other(String),
}

#[derive(Deserialize)]
struct PathData {
    path: String,
    #[serde(default)]
    data: Value,
}

impl StreamEvent {
    pub fn parse(event: &str, data: Option<&str>) -> SparrowResult<Self> {
        let path_data = || -> SparrowResult<PathData> {
            let raw = data.ok_or_else(|| SparrowError::FirebaseDatabase(format!("'{}' event without data", event)))?;
            Ok(serde_json::from_str(raw)?)
        };

        Ok(match event {
            "put" => {
                let PathData { path, data } = path_data()?;
                StreamEvent::Put { path, data }
            }
            "patch" => {
                let PathData { path, data } = path_data()?;
                StreamEvent::Patch { path, data }
            }
            "cancel" => StreamEvent::Cancel(data.unwrap_or_default().to_string()),
            "auth_revoked" => StreamEvent::AuthRevoked,
            other => StreamEvent::Other(other.to_string()),
        })
    }
}

/// Local copy of the trips collection, kept across reconnects so a replayed
/// snapshot only reports what actually changed.
#[derive(Debug, Default)]
pub struct TripMirror {
    trips: Map<String, Value>,
}

impl TripMirror {
    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }

    pub fn apply_put(&mut self, path: &str, data: Value) -> Vec<TripChange> {
        let segments = split_path(path);

        if segments.is_empty() {
            let before = std::mem::take(&mut self.trips);
            if let Value::Object(trips) = data {
                self.trips = trips;
            }
            let ids: BTreeSet<String> = before.keys().chain(self.trips.keys()).cloned().collect();
            return ids
                .into_iter()
                .filter_map(|id| self.classify(&id, before.get(&id)))
                .collect();
        }

        let id = segments[0].to_string();
        let before = self.trips.get(&id).cloned();
        set_path(&mut self.trips, &segments, data);
        self.classify(&id, before.as_ref()).into_iter().collect()
    }

    pub fn apply_patch(&mut self, path: &str, data: Value) -> Vec<TripChange> {
        let Value::Object(children) = data else {
            tracing::debug!("Ignoring non-object patch at {}", path);
            return Vec::new();
        };
        let base = split_path(path);

        let writes: Vec<(Vec<String>, Value)> = children
            .into_iter()
            .map(|(key, value)| {
                let mut full: Vec<String> = base.iter().map(|s| s.to_string()).collect();
                full.extend(split_path(&key).into_iter().map(str::to_string));
                (full, value)
            })
            .filter(|(full, _)| !full.is_empty())
            .collect();

        let mut before: HashMap<String, Option<Value>> = HashMap::new();
        for (full, _) in &writes {
            before
                .entry(full[0].clone())
                .or_insert_with(|| self.trips.get(&full[0]).cloned());
        }

        for (full, value) in writes {
            let segments: Vec<&str> = full.iter().map(String::as_str).collect();
            set_path(&mut self.trips, &segments, value);
        }

        let ids: BTreeSet<String> = before.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| {
                let previous = before.get(&id).and_then(Option::as_ref);
                self.classify(&id, previous)
            })
            .collect()
    }

    fn classify(&mut self, id: &str, before: Option<&Value>) -> Option<TripChange> {
        // A trip whose last field was deleted is gone
        if self.trips.get(id).is_some_and(|v| v.as_object().is_some_and(Map::is_empty)) {
            self.trips.remove(id);
        }

        match (before, self.trips.get(id)) {
            (None, None) => None,
            (Some(_), None) => Some(TripChange::removed(id)),
            (Some(old), Some(new)) if old == new => None,
            (old, Some(new)) => match serde_json::from_value::<Trip>(new.clone()) {
                Ok(trip) => {
                    let trip = trip.with_id(id);
                    Some(if old.is_none() { TripChange::added(trip) } else { TripChange::modified(trip) })
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed trip {}: {}", id, e);
                    None
                }
            },
        }
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Write `value` at `segments`, creating intermediate objects. `null` deletes.
fn set_path(root: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        let entry = node
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            if value.is_null() {
                return;
            }
            *entry = Value::Object(Map::new());
        }
        node = match entry.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }

    if value.is_null() {
        node.remove(*last);
    } else {
        node.insert(last.to_string(), value);
    }
}

// src/state.rs
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing;

use crate::{
    errors::{SparrowError, SparrowResult},
    services::{
        firebase_store::{FirebaseConfig, FirebaseTripStore},
        google_auth::{ServiceAccountKey, ServiceAccountTokenSource, FCM_SCOPE},
        listener_service::ListenerService,
        messaging_service::{
            FcmConfig, FcmNotificationService, NotificationService, DEFAULT_ANDROID_CHANNEL, DEFAULT_FCM_BASE_URL,
        },
        trip_notifier::TripNotifier,
        trip_store::TripStore,
    },
};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RECONNECT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub service_account: Option<ServiceAccountKey>,
    pub fcm_api_url: String,
    pub android_channel_id: String,
    pub database_url: Option<String>,
    pub database_secret: Option<String>,
    pub reconnect_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            service_account: None,
            fcm_api_url: DEFAULT_FCM_BASE_URL.to_string(),
            android_channel_id: DEFAULT_ANDROID_CHANNEL.to_string(),
            database_url: None,
            database_secret: None,
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_SECS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> SparrowResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key → value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> SparrowResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| SparrowError::invalid_configuration(format!("PORT must be a port number, got '{}'", raw)))?,
            None => defaults.port,
        };

        let reconnect_delay = match get("WATCH_RECONNECT_SECS") {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                SparrowError::invalid_configuration(format!("WATCH_RECONNECT_SECS must be whole seconds, got '{}'", raw))
            })?),
            None => defaults.reconnect_delay,
        };

        let service_account = match get("FIREBASE_SERVICE_ACCOUNT") {
            Some(raw) => Some(parse_service_account(&raw)?),
            None => None,
        };

        let database_url = get("FIREBASE_DATABASE_URL").or_else(|| {
            service_account
                .as_ref()
                .filter(|account| !account.project_id.is_empty())
                .map(|account| format!("https://{}.firebaseio.com", account.project_id))
        });

        Ok(Self {
            port,
            service_account,
            fcm_api_url: get("FCM_API_URL").unwrap_or(defaults.fcm_api_url),
            android_channel_id: get("FCM_ANDROID_CHANNEL_ID").unwrap_or(defaults.android_channel_id),
            database_url,
            database_secret: get("FIREBASE_DATABASE_SECRET"),
            reconnect_delay,
        })
    }

    /// The service account, when it can sign FCM token requests.
    pub fn service_account(&self) -> SparrowResult<&ServiceAccountKey> {
        self.service_account
            .as_ref()
            .filter(|account| account.is_complete())
            .ok_or_else(|| SparrowError::configuration_missing("FIREBASE_SERVICE_ACCOUNT"))
    }

    pub fn fcm_config(&self) -> SparrowResult<FcmConfig> {
        let account = self.service_account()?;
        Ok(FcmConfig {
            fcm_base_url: self.fcm_api_url.clone(),
            android_channel_id: self.android_channel_id.clone(),
            ..FcmConfig::new(account.project_id.clone())
        })
    }

    pub fn firebase_config(&self) -> SparrowResult<FirebaseConfig> {
        let url = self.database_url.clone().ok_or_else(|| {
            SparrowError::configuration_missing("FIREBASE_DATABASE_URL or FIREBASE_SERVICE_ACCOUNT")
        })?;
        Ok(FirebaseConfig {
            database_url: url,
            auth_token: self.database_secret.clone(),
            reconnect_delay: self.reconnect_delay,
        })
    }
}

/// Missing fields are allowed here. An incomplete account only counts as
/// not configured yet.
fn parse_service_account(raw: &str) -> SparrowResult<ServiceAccountKey> {
    serde_json::from_str(raw).map_err(|e| {
        SparrowError::invalid_configuration(format!("FIREBASE_SERVICE_ACCOUNT is not valid JSON: {}", e))
    })
}

/// What the listeners need to run.
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn TripStore>,
    pub notification_service: Arc<dyn NotificationService>,
}

#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load(&self) -> SparrowResult<Components>;
}

/// Reads the environment on every attempt, so credentials added after boot
/// are picked up by the next initialization.
pub struct EnvComponentLoader;

#[async_trait]
impl ComponentLoader for EnvComponentLoader {
    async fn load(&self) -> SparrowResult<Components> {
        let config = AppConfig::from_env()?;
        let fcm = config.fcm_config()?;
        let tokens = ServiceAccountTokenSource::new(config.service_account()?.clone(), FCM_SCOPE)?;
        let firebase = config.firebase_config()?;

        Ok(Components {
            store: Arc::new(FirebaseTripStore::new(firebase)?),
            notification_service: Arc::new(FcmNotificationService::new(fcm, Arc::new(tokens))),
        })
    }
}

/// Always hands out the same components. Used by tests and embedders.
pub struct StaticComponentLoader(pub Components);

#[async_trait]
impl ComponentLoader for StaticComponentLoader {
    async fn load(&self) -> SparrowResult<Components> {
        Ok(self.0.clone())
    }
}

/// Uninitialized → Ready, once. Every entry point may call `initialize`.
pub struct Lifecycle {
    // Serializes initialize and shutdown
    transition: Mutex<()>,
    // Only locked for quick reads and swaps, never across a load
    listeners: Mutex<Option<ListenerService>>,
    ready: AtomicBool,
    loader: Box<dyn ComponentLoader>,
}

impl Lifecycle {
    pub fn new(loader: Box<dyn ComponentLoader>) -> Self {
        Self {
            transition: Mutex::new(()),
            listeners: Mutex::new(None),
            ready: AtomicBool::new(false),
            loader,
        }
    }

    /// Load components and start the listeners. Returns `Ok(false)` when the
    /// service was already running. On error nothing is started.
    pub async fn initialize(&self) -> SparrowResult<bool> {
        let _transition = self.transition.lock().await;
        if self.is_ready() {
            return Ok(false);
        }

        let components = match self.loader.load().await {
            Ok(components) => components,
            Err(e) if e.is_configuration() => {
                tracing::warn!("Not starting listeners, waiting for configuration: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Failed to load notification components: {}", e);
                return Err(e);
            }
        };

        let notifier = Arc::new(TripNotifier::new(
            components.store.clone(),
            components.notification_service.clone(),
        ));
        let listeners = ListenerService::start(components.store, notifier).await?;

        *self.listeners.lock().await = Some(listeners);
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!("Notification service ready");
        Ok(true)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn listeners_running(&self) -> bool {
        self.listeners
            .lock()
            .await
            .as_ref()
            .is_some_and(|listeners| listeners.is_running())
    }

    pub async fn shutdown(&self) {
        let _transition = self.transition.lock().await;
        if let Some(listeners) = self.listeners.lock().await.take() {
            listeners.stop();
            tracing::info!("Trip listeners stopped");
        }
        self.ready.store(false, Ordering::SeqCst);
    }
}

pub struct AppState {
    pub lifecycle: Lifecycle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(loader: Box<dyn ComponentLoader>) -> Self {
        Self {
            lifecycle: Lifecycle::new(loader),
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

// src/models/user.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Driver,
    Passenger,
    #[serde(other)]
    Other,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Other
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Active,    // Taking trips
    #[serde(other)]
    Inactive,
}

/// A user document. Only the fields the notifier reads are modelled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(default)]
    pub role: UserRole,
    pub driver_status: Option<DriverStatus>,
    #[serde(alias = "pushToken", alias = "playerId")]
    pub fcm_token: Option<String>,
}

impl User {
    pub fn driver(id: impl Into<String>, status: DriverStatus, fcm_token: Option<&str>) -> Self {
        Self {
            id: id.into(),
            role: UserRole::Driver,
            driver_status: Some(status),
            fcm_token: fcm_token.map(str::to_string),
        }
    }

    pub fn passenger(id: impl Into<String>, fcm_token: Option<&str>) -> Self {
        Self {
            id: id.into(),
            role: UserRole::Passenger,
            driver_status: None,
            fcm_token: fcm_token.map(str::to_string),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_active_driver(&self) -> bool {
        self.role == UserRole::Driver && self.driver_status == Some(DriverStatus::Active)
    }

    /// The push handle, treating an empty string as absent.
    pub fn push_handle(&self) -> Option<&str> {
        self.fcm_token.as_deref().filter(|token| !token.is_empty())
    }
}

// src/services/mod.rs
pub mod change_observer;
pub mod composer;
pub mod firebase_store;
pub mod google_auth;
pub mod listener_service;
pub mod messaging_service;
pub mod resolver;
pub mod trip_notifier;
pub mod trip_store;

// src/models/mod.rs
pub mod change;
pub mod notification;
pub mod trip;
pub mod user;

pub use change::*;
pub use notification::*;
pub use trip::*;
pub use user::*;

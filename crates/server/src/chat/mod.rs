//! Chat Service Layer
//!
//! Presence registry, message routing, typing relay and the per-connection
//! lifecycle that ties them together.

pub mod events;
pub mod handlers;
pub mod hub;
pub mod lifecycle;
pub mod presence;
pub mod router;
pub mod typing;

//! Appliance requester library.
//!
//! This crate primarily ships a `requester` binary, but we expose the
//! library surface to enable integration testing and reuse.

pub mod api;
pub mod appliance;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod expiry;
pub mod image;
pub mod offers;
pub mod state;
pub mod store;
pub mod upstream;

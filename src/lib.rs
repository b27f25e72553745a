//! Vehicle reservation engine: decides whether a rental interval may be
//! granted, keeps confirmed reservations of a vehicle from overlapping, drives
//! bookings through their lifecycle and extends rentals in progress.

pub mod abandonment;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod purge;
pub mod reaper;
pub mod wal;

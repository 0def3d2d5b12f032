//! Application services layer.
//!
//! Background services that keep the registry consistent between
//! announcements.

pub mod expiry_sweeper;

pub use expiry_sweeper::ExpirySweeper;

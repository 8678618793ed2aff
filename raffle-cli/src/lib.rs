//! Raffle CLI library.
//!
//! Drives the [`raffle`] wallet controller and raffle gateway from the
//! terminal, against a node or a simulated wallet set.

pub mod app;

pub use app::{App, Backend};

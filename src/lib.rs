//! Now-playing sync and crossfade playback engine for the Globe Radio device.
//!
//! The crate keeps a dedicated display in sync with a backend that pushes
//! full now-playing snapshots over a websocket, plays the backend's local
//! audio streams through a pair of crossfading channels, and delegates
//! transport control to an external streaming provider when the current
//! record says so.
//!
//! Modules:
//! * [`store`] - observable now-playing state with optimistic patches
//! * [`push`] - long-lived websocket delivering state snapshots
//! * [`engine`] - dual-channel crossfade playback engine
//! * [`provider`] - external streaming provider capability wrapper
//! * [`control`] - user intents (like, skip, play/pause, simulation)
//! * [`gateway`] - backend HTTP API client

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod channel;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod provider;
pub mod push;
pub mod ramp;
pub mod signal;
pub mod store;
pub mod token;

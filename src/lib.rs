//! # Cell Reporter Library
//!
//! Periodic reporting of device location and LTE cell measurements to a
//! remote collector over a strict request/reply transport.
//!
//! This library provides the snapshot model, the transport session, the
//! telemetry reporter state machine and the control surface used by the
//! `cell-reporter` binary.

pub mod config;
pub mod control;
pub mod error;
pub mod reporter;
pub mod snapshot;
pub mod transport;

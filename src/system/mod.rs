//! System utilities and monitoring
//!
//! This module contains monitoring and other system-level utilities.

pub mod metrics;

//! Face-Search Queue
//!
//! Core of the face-search portal backend: a producer/consumer job pipeline
//! over a shared Redis coordination store. Admits selfie-matching jobs with
//! per-user rate limiting and single-active-job exclusivity, streams live
//! status to clients over SSE, tracks liveness of the external GPU/CPU worker
//! fleet and exposes the admin control plane consumed by the operator
//! dashboard.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;

//! Offline-first cache and sync engine for the Satchel learning platform
//!
//! The engine runs as one long-lived background task that fronts all
//! network traffic for an embedding application: it classifies outbound
//! requests, serves them through per-class caching strategies, queues
//! mutations made while disconnected, replays them once connectivity
//! returns, and keeps local storage inside its quota.
//!
//! Embedders construct an [`engine::Engine`] with a [`config::Config`]
//! and a [`gateway::Gateway`], spawn it together with the returned
//! [`sync::SyncScheduler`], and talk to it through the
//! [`engine::EngineHandle`] command surface.

pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod notify;
pub mod queue;
pub mod quota;
pub mod sync;

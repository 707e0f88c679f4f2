//! # Gatehouse Core
//!
//! Credential rotation, request translation, caching, and upstream execution
//! for the Gatehouse multi-tenant LLM gateway.
//!
//! This crate is the request execution core; it has no HTTP surface of its
//! own (that's `gatehouse-server`). It owns:
//!
//! - [`hashing`] - stable fingerprints for cache keys (C1)
//! - [`cache`] - response cache (C2) and prompt cache (C3)
//! - [`credential`] - the rotating credential pool (C4)
//! - [`selector`] - retry policy and credential selection (C5)
//! - [`translate`] - client/upstream dialect translation (C6)
//! - [`executor`] - one upstream attempt, streaming or buffered (C7)
//! - [`config`] - environment-backed configuration
//!
//! The HTTP-facing streaming gateway (C8) lives in `gatehouse-server`, which
//! depends on this crate under the `gatehouse` lib name.

pub mod cache;
pub mod config;
pub mod constants;
pub mod credential;
pub mod executor;
pub mod hashing;
pub mod selector;
pub mod translate;

//! C6: translation layer between client and upstream dialects.
//!
//! This crate implements the shared JSON-rewrite rules of §4.6 in depth
//! (tool-schema tightening, Gemini tool-response adjacency, Factory/Droid
//! compaction, Codex checkpoint/huge-payload detection, and the
//! post-translation sanitation passes). Provider-specific wire-format field
//! mapping (the actual client-dialect ↔ upstream-dialect payload shape
//! conversion) is represented by [`dialect::ClientDialect`] plus the small
//! set of adapters in `gatehouse-server`'s route handlers that know each
//! provider's exact field names.

pub mod dialect;
pub mod harden;
pub mod sanitize;
pub mod types;

pub use dialect::{ClientDialect, FactoryCompat, FrameStyle, RouteDialect};
pub use types::{ClientProfile, TranslateError, TranslateResult};

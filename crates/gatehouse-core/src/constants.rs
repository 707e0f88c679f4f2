//! Tunable constants named directly by `spec.md`, kept in one place so the
//! config loader and the modules that consume them agree on defaults.

use std::time::Duration;

/// Default non-streaming body size cap for the executor (32 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Default base for the selector's jittered exponential backoff.
pub const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Default cap for the selector's backoff.
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Small cap on same-credential retries for transient errors.
pub const DEFAULT_MAX_ATTEMPTS_PER_CREDENTIAL: u32 = 2;

/// Default huge-payload threshold (bytes) for Codex checkpoint/huge-payload
/// detection, before clamping into `[CODEX_SYNTH_HUGE_MIN, CODEX_SYNTH_HUGE_MAX]`.
pub const DEFAULT_CODEX_SYNTH_HUGE_BYTES: usize = 250_000;
pub const CODEX_SYNTH_HUGE_MIN: usize = 32 * 1024;
pub const CODEX_SYNTH_HUGE_MAX: usize = 5 * 1024 * 1024;

/// Factory/Droid history-compaction thresholds.
pub const FACTORY_SUMMARY_KEEP_TAIL: usize = 4_000;
pub const FACTORY_MAX_TEXT_LEN: usize = 80_000;
pub const FACTORY_KEEP_HEAD: usize = 6_000;
pub const FACTORY_KEEP_TAIL: usize = 10_000;
pub const FACTORY_TRUNCATION_MARKER: &str = "\n\n...[ProxyPilot truncated large history]...\n\n";

/// Silent MAX_TOKENS heuristic threshold on `usage.output_tokens`.
pub const SILENT_MAX_TOKENS_OUTPUT_THRESHOLD: u64 = 8_000;

/// Error message truncation for synthesized SSE error frames.
pub const ERROR_FRAME_MAX_CHARS: usize = 1_800;

/// Embeddings: deterministic vector dimensions by model name suffix.
pub const EMBEDDING_DIM_SMALL: usize = 1536;
pub const EMBEDDING_DIM_LARGE: usize = 3072;

/// Codex checkpoint/compaction sentinel phrases (case-insensitive).
pub const CODEX_CHECKPOINT_SENTINELS: &[&str] = &[
    "context checkpoint compaction",
    "handoff summary",
    "resume the task",
    "/compact",
];

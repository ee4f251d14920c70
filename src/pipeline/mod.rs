//! Per-page pipeline stages.
//!
//! Each submodule implements one step. The orchestrator in [`crate::sync`]
//! composes them; nothing here knows about jobs or events.
//!
//! ## Data Flow
//!
//! ```text
//!                 ┌─▶ image::crop ──▶ encode ──▶ llm ──▶ response ──▶ classify
//! page image ─────┤
//!                 └─▶ image::rgb  ──▶ encode ──▶ llm ──▶ response ──▶ extract
//! ```
//!
//! 1. [`image`]: classification crop and extraction re-encode; CPU-bound,
//!    run in `spawn_blocking`
//! 2. [`encode`]: base64-wrap bytes for the multimodal request body
//! 3. [`llm`]: the [`llm::VisionModel`] seam, with retry and timeout
//! 4. [`response`]: fence stripping and schema validation of model text
//! 5. [`classify`] / [`extract`]: memoized stage drivers that persist
//!    their results

pub mod classify;
pub mod encode;
pub mod extract;
pub mod image;
pub mod llm;
pub mod response;

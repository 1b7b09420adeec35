//! Pipeline stages and collaborators below the chat logic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ (collector / synthesizer) ──▶ model
//! (URL/path)  (pdfium)                  throttle ──┘
//! ```
//!
//! 1. [`input`]    — resolve the user-supplied path or URL to PDF bytes
//! 2. [`render`]   — rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`model`]    — the VLM collaborator; the only stage with model I/O
//! 4. [`throttle`] — minimum interval between model requests

pub mod input;
pub mod model;
pub mod render;
pub mod throttle;

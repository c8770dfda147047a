//! Pipeline stages for one image-to-text call.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without a network or a real scan.
//!
//! ## Data Flow
//!
//! ```text
//! encode ──▶ request ──▶ (HTTP, in crate::client) ──▶ response
//! (resize,    (JSON envelope)                          (SSE lines or JSON
//!  JPEG, b64)                                           document → text + usage)
//! ```
//!
//! 1. [`encode`]   — decode the scan, cap its size, re-encode as JPEG, base64
//! 2. [`request`]  — build the `generateContent` body and endpoint URL
//! 3. [`response`] — consume either response shape through one parser

pub mod encode;
pub mod request;
pub mod response;

//! Session-scoped neural style transfer.
//!
//! A remote user picks a numbered style, uploads a photo, and gets back a
//! stylized JPEG.  Each conversation is an independent [`session`] whose
//! events are applied strictly in order; photos are stylized on a bounded
//! [`inference`] pool that shares one [`style::ModelCache`] across sessions.
//!
//! ```text
//! transport ─▶ session::SessionRegistry ─▶ SessionStateMachine
//!                                              │ Submit
//!                                              ▼
//!                       inference::InferenceExecutor (bounded)
//!                  imaging::preprocess → style::ModelCache::get
//!                  → StyleNetwork::stylize → imaging::postprocess
//! ```

pub mod config;
pub mod imaging;
pub mod inference;
pub mod session;
pub mod style;
pub mod transport;

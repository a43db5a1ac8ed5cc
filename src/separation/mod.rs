//! Stem separation
//!
//! Splits a sample into a vocals stem and an accompaniment stem. The job
//! runs offline like the other processing jobs and both stems land as new
//! samples. The backend sits behind a trait so a model-based separator can
//! replace the DSP ones without touching callers.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            SeparationService             │
//! │  • picks the backend from config         │
//! │  • checks stem shapes                    │
//! └──────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌──────────────────────────────────────────┐
//! │        SeparationBackend (trait)         │
//! └──────────────────────────────────────────┘
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   ┌──────────────┐     ┌──────────────┐
//!   │ CenterBackend│     │MidSideBackend│
//!   └──────────────┘     └──────────────┘
//! ```

mod backend;
mod service;

pub use backend::StemData;
pub use service::SeparationService;

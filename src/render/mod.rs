//! Render module - UI components for visualization

mod trace;

pub use trace::{Trace, TraceSettings};

//! Request admission: the ordered filter chain, the prompt-injection
//! screen, and the input/output sanitizers.
//!
//! Cheap, local checks run before anything that touches a store, and
//! everything here runs before the upstream call. The screen and the
//! sanitizers are defense-in-depth — neither is ever the sole guard.

pub mod chain;
pub mod limits;
pub mod sanitize;
pub mod screen;

pub use chain::{run_chain, AdmissionReport, StageCx};
pub use screen::{screen, PatternFamily, Screening};

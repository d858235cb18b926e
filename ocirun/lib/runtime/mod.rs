//! The container lifecycle orchestrator (C7).

mod orchestrator;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use orchestrator::*;

// marksync shared type definitions
// Each submodule defines types used across the crate.

pub mod bookmark;
pub mod errors;
pub mod query;
pub mod realtime;
pub mod session;
pub mod settings;

//! Infrastructure layer - plugin runtime and process plumbing

pub mod extension;
pub mod logging;

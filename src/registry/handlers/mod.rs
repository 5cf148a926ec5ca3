//! Dispatch targets for the built-in catalogue.

pub mod batch;
pub mod chunked;
pub mod forward;
pub mod local;

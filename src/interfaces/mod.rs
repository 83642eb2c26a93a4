//! Outer surfaces: the webhook HTTP endpoint and the operator CSV batch.

pub mod csv;
pub mod http;

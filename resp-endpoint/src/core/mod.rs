//! Core types, re-exported from `resp-endpoint-core`

pub use resp_endpoint_core::{codec, config, error, strings, types, value};

//! Common code shared between `focus_client` and analyzer implementations.
pub mod data_uri;
pub mod protocol;

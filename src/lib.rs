//! Map overlay reconciliation for a property-listing map.
//!
//! Pins are fetched per viewport, merged with locally optimistic drafts and
//! arranged into marker, label or cluster layers depending on the zoom level.
//! The map widget itself sits behind the traits in [`sdk`].

pub mod api;
pub mod cluster;
pub mod config;
pub mod drafts;
pub mod error;
pub mod events;
pub mod geo;
pub mod geocode;
pub mod icons;
pub mod kakao;
pub mod labels;
pub mod marker_pool;
pub mod models;
pub mod poi;
pub mod sdk;
pub mod session;
pub mod viewport;

pub use config::Config;
pub use error::{ApiError, ApiResult};

//! Groundwater storage change from satellite gravimetry and a land-surface
//! model: fusion, climatology and point trends.

pub mod aggregation;
pub mod artifact;
pub mod calendar;
pub mod config;
pub mod error;
pub mod fusion;
pub mod grid;
pub mod masked;
pub mod pipeline;
pub mod point;
pub mod polygon;
pub mod sources;
pub mod spline;

pub use error::{GwsError, GwsResult};

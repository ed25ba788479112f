//! Heart-disease risk prediction service.
//!
//! A trained binary classifier exposed over HTTP: single-record and batch
//! CSV inference plus on-demand retraining. The interesting part is the
//! small pipeline behind the handlers (schema validation and alias
//! resolution, table-relative cleaning, frozen z-score scaling, and a
//! swappable classifier pair); the HTTP layer is thin plumbing around it.

pub mod clean;
pub mod config;
pub mod error;
pub mod forest;
pub mod metrics;
pub mod model;
pub mod network;
pub mod pipeline;
pub mod scale;
pub mod schema;
pub mod server;
pub mod store;

//! HTTP API handlers for annot-ui

pub mod health;
pub mod sessions;
pub mod ui;

pub use health::health_routes;
pub use sessions::session_routes;
pub use ui::ui_routes;

pub mod api;
pub mod bridge;
pub mod core;
pub mod logging;

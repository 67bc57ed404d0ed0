//! Gate Forecast API library exports

pub mod capacity;
pub mod config;
pub mod db;
pub mod error;
pub mod meta;
pub mod normalize;
pub mod planner;
pub mod routes;
pub mod shaper;
pub mod state;
pub mod store;
pub mod window;

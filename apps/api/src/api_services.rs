mod database;
mod state_builder;
mod sweeper;

pub use database::connect_and_migrate;
pub use state_builder::{build_app_state, build_limiters};

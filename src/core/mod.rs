pub mod chain;
pub mod params;
pub mod state;
pub mod types;

pub mod chain;
pub mod state;

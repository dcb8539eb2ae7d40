//! Durable FSM state history, read once at startup to pick the state to
//! resume in.

mod state_history;

pub use state_history::*;

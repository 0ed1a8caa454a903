//! Voice banking backend.
//!
//! The agent-facing half of a voice banking app: login sessions, short-lived
//! room credentials, and the in-room RPC bridge the agent uses to request
//! sensitive input (account choice, payee account number, transaction PIN)
//! from the human operator instead of the voice channel.

pub mod cli;
pub mod prompt;
pub mod protocol;
pub mod router;
pub mod rpc;
pub mod session_store;

//! Inter-node communication layer of the pargraph distributed
//! graph-exploration engine.
//!
//! A cluster of cooperating nodes jointly explores a parametrized
//! state-transition graph. Nodes exchange exploration jobs (one graph edge
//! plus the parameter set under which the transition is valid) and
//! termination tokens over a blocking, rank-addressed transport. This crate
//! provides the wire protocol, the background dispatch loop that turns the
//! blocking receive primitive into callback delivery, and the ring-based
//! shutdown handshake.

pub mod buffer;
pub mod colors;
pub mod comm;
pub mod config;
pub mod counters;
pub mod message;
pub mod transport;

pub use comm::{CommError, Communicator, Message, SendHandle};
pub use message::{Job, StateId, Token};

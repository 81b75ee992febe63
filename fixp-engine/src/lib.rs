/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # FIXP Engine
//!
//! Acceptor-side FIXP session engine.
//!
//! This crate provides:
//! - **Consumer and Authenticator traits**: callbacks for session owners and
//!   pluggable credential checks
//! - **ConnectionStateMachine**: per-transport protocol handling
//! - **Engine**: single-threaded owner of every session and transport
//! - **EngineHandle**: async command/reply front end for an engine task
//! - **Acceptor**: TCP listener feeding the engine
//! - **Builder API**: Fluent configuration for engine setup

pub mod acceptor;
pub mod application;
pub mod builder;
pub mod connection;
pub mod engine;
pub mod handle;

#[cfg(test)]
mod testing;

pub use acceptor::Acceptor;
pub use application::{
    AcceptAll, AuthContext, AuthDecision, Authenticator, Consumer, NoOpConsumer, Outbox,
    RetransmitDecision,
};
pub use builder::EngineBuilder;
pub use connection::ConnectionStateMachine;
pub use engine::Engine;
pub use handle::{Command, EngineHandle, run_engine};

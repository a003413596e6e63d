//! Pipeline stages and the orchestrator that sequences them.
//!
//! Each stage talks to one external system behind a trait so the
//! orchestrator can be driven with fakes.

pub mod archiver;
pub mod http;
pub mod orchestrator;
pub mod secret_provider;
pub mod state_fetcher;

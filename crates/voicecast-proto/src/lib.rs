//! Types shared between the voicecast daemon, its control clients and the
//! relay process: wire protocol, catalog records, configuration and paths.

pub mod catalog;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;

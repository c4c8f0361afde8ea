//! Kali-E API Library Crate
//!
//! The backend the voice client talks to: room token issuance, session
//! records with transcripts, agent dispatch and per-room file uploads. The
//! `api` binary is a thin wrapper around this library.

pub mod agent;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod store;

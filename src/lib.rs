//! `strand` is a long-running control service for addressable LED strips.
//! Clients submit animation requests over TCP; the dispatcher runs them as
//! one-shot or continuous tasks against a shared strip, and a local text
//! console administers the running set.

pub mod animation;
pub mod codec;
pub mod command;
pub mod config;
pub mod connections;
pub mod handler;
pub mod persist;
pub mod registry;
pub mod server;
pub mod strip;

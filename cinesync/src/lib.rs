//! # cinesync
//!
//! Command-line front end for the ingestion engine in `cinesync-core`:
//! configuration loading and result rendering. The binary in `main.rs`
//! wires these to the engine.

#![allow(missing_docs)]

pub mod config;
pub mod output;

//! kpm, a package manager for the KCL configuration language.
//!
//! The binary is a thin front end: argument parsing, logging setup and dispatch live here,
//! everything else lives in the `pkg` crate.

#![warn(missing_docs)]

pub mod cli;

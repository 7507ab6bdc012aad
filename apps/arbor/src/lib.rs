//! # arbor
//!
//! Command-line front end of the Arbor skeleton annotation store. The
//! commands live in [`cli`] so integration tests can drive them directly.

pub mod cli;

//! The flamerig profiled load tool.
//!
//! flamerig launches a server under a sampling profiler, fires a seeded,
//! reproducible sequence of HTTP GET requests at it, stops both and renders the
//! collected samples into a flame graph by way of external tools. This library
//! supports the flamerig binary found elsewhere in this project.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

mod common;
pub mod config;
pub mod driver;
pub mod process;
pub mod profiler;
pub mod report;
pub mod rig;
pub mod sequence;
pub mod target;

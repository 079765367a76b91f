//! Command-line interface of the two binaries

pub mod args;

pub use args::{ClientArgs, ServerArgs};

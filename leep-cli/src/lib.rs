//! Subcommands of the `leep` command line client, writing their output to any
//! [`std::io::Write`].
pub mod commands;

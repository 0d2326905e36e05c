//! Command-line interface definitions for the `trireme` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `trireme` binary.
#[derive(Debug, Parser)]
#[command(
    name = "trireme",
    about = "Provision and manage a Triton machine through CloudAPI",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Check connectivity and resolve the image and package references.
    #[command(name = "preflight")]
    Preflight,
    /// Create the machine and record its identifier.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Print the machine's primary address.
    #[command(name = "ip")]
    Ip,
    /// Print the machine's lifecycle state.
    #[command(name = "state")]
    State,
    /// Print the Docker engine URL of the running machine.
    #[command(name = "url")]
    Url,
    /// Boot the machine.
    #[command(name = "start")]
    Start,
    /// Gracefully stop the machine.
    #[command(name = "stop")]
    Stop,
    /// Reboot the machine.
    #[command(name = "restart")]
    Restart,
    /// Stop the machine. CloudAPI offers no forced power-off.
    #[command(name = "kill")]
    Kill,
    /// Delete the machine and forget its identifier.
    #[command(name = "rm")]
    Rm,
    /// Print the persisted configuration record.
    #[command(name = "config")]
    Config,
}

/// Arguments for the `trireme create` subcommand.
#[derive(Debug, Default, Parser)]
pub(crate) struct CreateCommand {
    /// Override the machine display name.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Override the image reference (`name`, `name@version`, id, or short id).
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the package name or identifier.
    #[arg(long, value_name = "PACKAGE")]
    pub(crate) package: Option<String>,
    /// Return once the machine identifier is known instead of waiting for an
    /// address.
    #[arg(long)]
    pub(crate) no_wait: bool,
}

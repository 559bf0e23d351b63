//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Browser activity monitor: native-messaging host and local tools.
#[derive(Parser)]
#[command(name = "browsersec")]
#[command(version)]
pub(crate) struct Cli {
    /// Data directory (settings, activity database, exports)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the native-messaging host on stdin/stdout
    Host,

    /// Write default settings, keeping any values already stored
    Install,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Print the activity tables
    Dashboard {
        /// Print JSON instead of text tables
        #[arg(long)]
        json: bool,
    },

    /// Ask the classifier which recorded actions on a site are sensitive
    Analyze {
        /// Hostname, as listed by `dashboard`
        site: String,
    },

    /// Export all activity as JSON
    Export {
        /// Output directory (default: <data-dir>/exports)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show storage statistics
    Stats,
}

#[derive(Subcommand)]
pub(crate) enum SettingsAction {
    /// Print the stored settings
    Show,

    /// Change one setting, e.g. `set screenshotInterval 30`
    Set {
        /// camelCase setting name
        key: String,
        value: String,
    },
}

/// Chrome launches native hosts with the caller's origin as the first
/// argument.
pub(crate) fn launched_by_browser() -> bool {
    std::env::args()
        .nth(1)
        .is_some_and(|arg| arg.starts_with("chrome-extension://"))
}

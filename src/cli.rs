use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "overlord")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Queue snap installs, updates and removals and drive them to completion", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install a snap
    Install(SnapArgs),

    /// Refresh an installed snap to the latest revision of its channel
    Update(SnapArgs),

    /// Remove an installed snap
    Remove(RemoveArgs),

    /// List changes
    Changes {
        /// Which changes to show
        #[arg(short, long, value_enum, default_value_t = Select::InProgress)]
        select: Select,
    },

    /// Show a change and its tasks
    Change {
        /// Change id
        id: String,
    },

    /// Abort a change that is still in progress
    Abort {
        /// Change id
        id: String,
    },

    /// Record store credentials for a user
    Login {
        /// Store account name
        username: String,

        /// Root macaroon
        #[arg(long, env = "OVERLORD_MACAROON")]
        macaroon: String,

        /// Discharge macaroon (repeatable)
        #[arg(long = "discharge")]
        discharges: Vec<String>,
    },

    /// Forget a user's credentials
    Logout {
        /// User id, as printed by login
        id: u64,
    },

    /// Run queued changes
    Run {
        /// Run until every change is ready, then exit
        #[arg(long)]
        once: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct SnapArgs {
    /// Snap name
    pub name: String,

    /// Store channel to follow
    #[arg(short, long, default_value = "")]
    pub channel: String,

    /// Install in development mode
    #[arg(long)]
    pub devmode: bool,

    #[command(flatten)]
    pub common: ChangeArgs,
}

#[derive(Args)]
pub struct RemoveArgs {
    /// Snap name
    pub name: String,

    #[command(flatten)]
    pub common: ChangeArgs,
}

/// Options shared by commands that queue a change
#[derive(Args)]
pub struct ChangeArgs {
    /// Queue the change and return without running it
    #[arg(long)]
    pub no_wait: bool,

    /// Act on behalf of this logged-in user
    #[arg(short, long)]
    pub user: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Select {
    InProgress,
    Ready,
    All,
}

impl Select {
    pub fn as_query(self) -> &'static str {
        match self {
            Select::InProgress => "in-progress",
            Select::Ready => "ready",
            Select::All => "all",
        }
    }
}

use clap::{Parser, Subcommand, ValueEnum};

use crate::reconcile::SourceKind;

#[derive(Parser)]
#[command(name = "kasabot")]
#[command(author, version, about = "Point-of-sale Telegram bot for Checkbox fiscal receipts", long_about = None)]
pub struct Cli {
    /// Settings file (overrides CONFIG_PATH)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot, the reconcilers and the shift close scheduler
    Run,

    /// Close the current shift once and report it
    ShiftClose,

    /// Run one reconciler without the bot dispatcher
    Reconcile {
        #[arg(value_enum)]
        source: SourceArg,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Privat24,
    Fondy,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Privat24 => SourceKind::Privat24,
            SourceArg::Fondy => SourceKind::Fondy,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

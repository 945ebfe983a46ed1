use clap::Subcommand;
use std::path::PathBuf;

use assetpak::config::PackConfig;

pub mod extract;
pub mod inspect;
pub mod list;
pub mod pack;
pub mod verify;

#[derive(Subcommand)]
pub enum Commands {
    /// Show header fields and the head record
    Inspect {
        /// Container file
        file: PathBuf,
    },

    /// List manifest items without decoding them
    List {
        /// Container file
        file: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Check header, region and item hashes
    Verify {
        /// Container file
        file: PathBuf,
    },

    /// Write every item's raw bytes to a directory
    Extract {
        /// Container file
        file: PathBuf,

        /// Output directory
        destination: PathBuf,
    },

    /// Pack the files of a directory into a container
    Pack {
        /// Source directory
        source: PathBuf,

        /// Output container file
        destination: PathBuf,

        /// Package group
        #[arg(short, long, default_value = "local")]
        group: String,

        /// Package version
        #[arg(long, default_value = "1.0.0")]
        version: String,

        /// Files smaller than this many bytes are embedded in the manifest
        #[arg(long, default_value_t = 0)]
        inline_below: u64,
    },
}

impl Commands {
    pub fn execute(&self, config: &PackConfig) -> anyhow::Result<()> {
        match self {
            Commands::Inspect { file } => inspect::execute(file),
            Commands::List { file, json } => list::execute(file, *json),
            Commands::Verify { file } => verify::execute(file, config),
            Commands::Extract { file, destination } => extract::execute(file, destination, config),
            Commands::Pack {
                source,
                destination,
                group,
                version,
                inline_below,
            } => pack::execute(
                source,
                destination,
                &pack::PackArgs {
                    group,
                    version,
                    inline_below: *inline_below,
                },
                config,
            ),
        }
    }
}

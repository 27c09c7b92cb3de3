use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gatelink", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,

    /// Gateway URL, overriding the config file
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Shared gateway token, overriding the config file
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show (creating if needed) this device's identity
    Identity,

    /// Call a gateway method and print the result
    Call {
        /// Method name, e.g. "health" or "sessions.list"
        method: String,

        /// Params as a JSON object
        #[arg(short, long)]
        params: Option<String>,

        /// Wait past an "accepted" acknowledgement for the final result
        #[arg(long)]
        expect_final: bool,
    },

    /// List gateway sessions
    Sessions {
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Send one chat message and wait for the reply
    Chat {
        message: String,

        /// Session label to resolve
        #[arg(short, long, default_value = "main")]
        session: String,
    },

    /// Show chat history of a session
    History {
        /// Session label to resolve
        #[arg(short, long, default_value = "main")]
        session: String,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Remove the stored device token so the next connect uses the shared token
    ForgetToken {
        /// Role whose token to remove (defaults to the configured role)
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

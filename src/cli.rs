use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "boardroom",
    about = "Terminal client for a three-stage LLM council",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Backend base URL. Overrides the config file and BOARDROOM_API_BASE.
    #[arg(long, global = true, value_name = "URL")]
    pub api_base: Option<String>,

    /// Config file to read.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Display options for commands that render council output.
#[derive(clap::Args, Debug)]
pub struct DisplayOpts {
    /// Print every stage 1 response and stage 2 evaluation in full.
    #[arg(long)]
    pub details: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List conversations, newest first.
    List,

    /// Create an empty conversation and print its id.
    New,

    /// Print a conversation with all of its stages.
    Show {
        /// Conversation id or unique prefix.
        id: String,

        #[command(flatten)]
        display: DisplayOpts,
    },

    /// Set a conversation's title.
    Rename {
        /// Conversation id or unique prefix.
        id: String,

        title: String,
    },

    /// Delete a conversation.
    Delete {
        /// Conversation id or unique prefix.
        id: String,
    },

    /// Save a conversation as markdown.
    Export {
        /// Conversation id or unique prefix.
        id: String,

        /// Output file. Default: boardroom-session-<id>.md
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Ask the council one question and stream the answer.
    Ask {
        /// Question to send.
        #[arg(value_name = "PROMPT")]
        prompt: String,

        /// Continue this conversation instead of starting a new one.
        #[arg(long, short)]
        conversation: Option<String>,

        #[command(flatten)]
        display: DisplayOpts,
    },

    /// Interactive chat, one message per line.
    Chat {
        /// Conversation id or unique prefix to open.
        id: Option<String>,

        #[command(flatten)]
        display: DisplayOpts,
    },
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "android-x86-hook",
    version,
    about = "KubeVirt hook sidecar injecting Android-x86 domain settings from VMI annotations"
)]
pub struct Cli {
    /// Path to config file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the hook socket (overrides config)
    #[arg(long, global = true)]
    pub socket_dir: Option<PathBuf>,

    /// Platform domain used in annotation keys (overrides config)
    #[arg(long, global = true)]
    pub annotation_domain: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the hook on its Unix socket (default)
    Serve,

    /// Print the hook's capability descriptor as JSON
    Info {
        /// Query a running hook on this socket instead of answering locally
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// Apply the annotation rules to a domain XML file and print the result
    Mutate {
        /// VMI descriptor (JSON)
        #[arg(long)]
        vmi: PathBuf,

        /// Libvirt domain XML
        #[arg(long)]
        domain: PathBuf,
    },
}

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vmregistry-cli")]
#[command(about = "Query the VM inventory of a vmregistryd host", long_about = None)]
pub struct Cli {
    /// Base URL of the vmregistryd API
    #[arg(long, global = true, env = "VMREGISTRY_SERVER", default_value = "http://localhost:8080")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List virtual machines with their MAC and IP addresses
    Ls {
        /// Print the raw JSON reply instead of a table
        #[arg(long)]
        json: bool,
    },
}

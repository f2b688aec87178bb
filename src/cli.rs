use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::{
    commands::{
        AddCommand, CompletionsCommand, ExecCommand, ListCommand, LoginCommand, RemoveCommand,
    },
    constants::DEFAULT_KEYRING_SERVICE,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "vaulted", version, about = "Keep AWS credentials in the OS keyring and run commands with temporary sessions", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    #[arg(
        short = 'p',
        long,
        global = true,
        default_value = "default",
        help = "AWS profile name"
    )]
    pub profile: String,

    #[arg(
        long,
        global = true,
        env = "VAULTED_KEYRING_SERVICE",
        default_value = DEFAULT_KEYRING_SERVICE,
        help = "Keyring service that holds credentials and sessions"
    )]
    pub keyring_service: String,

    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v info, -vv debug, -vvv trace)")]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Store a long-term access key for a profile")]
    Add(AddCommand),
    #[command(about = "Delete a profile's stored credentials and sessions")]
    Remove(RemoveCommand),
    #[command(about = "List profiles with stored credentials and cached sessions")]
    List(ListCommand),
    #[command(about = "Run a command with temporary credentials for a profile")]
    Exec(ExecCommand),
    #[command(about = "Open the AWS Management Console with temporary credentials")]
    Login(LoginCommand),
    #[command(about = "Generate shell completion scripts for vaulted")]
    Completions(CompletionsCommand),
}

impl Cli {
    /// Run the selected command. Returns the process exit code.
    pub async fn execute(self) -> Result<i32> {
        let profile = self.profile;
        let service = self.keyring_service;

        match self.command {
            Commands::Add(cmd) => cmd.execute(&service, &profile).await.map(|()| 0),
            Commands::Remove(cmd) => cmd.execute(&service, &profile).await.map(|()| 0),
            Commands::List(cmd) => cmd.execute(&service).await.map(|()| 0),
            Commands::Exec(cmd) => cmd.execute(&service, &profile).await,
            Commands::Login(cmd) => cmd.execute(&service, &profile).await.map(|()| 0),
            Commands::Completions(cmd) => {
                cmd.execute();
                Ok(0)
            }
        }
    }
}

use clap::{Parser, Subcommand};
use orepublish::{OreConfig, OreDeployment, OreError, PublishRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Publish plugin versions to an Ore repository")]
struct Arguments {
    /// Ore instance to talk to
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Requested session lifetime, in seconds
    #[arg(long, global = true)]
    session_duration: Option<u64>,

    /// Read ORE_TOKEN and friends from this file first
    #[cfg(feature = "env-file")]
    #[arg(long, global = true, default_value = ".env")]
    env_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a new version of a project
    Publish {
        #[arg(long)]
        project: String,

        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        channel: Option<String>,

        /// Changelog for the version page
        #[arg(long, default_value = "")]
        body: String,

        #[arg(long)]
        no_forum_post: bool,
    },
    /// Show the permissions granted to the API key
    Permissions,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Arguments::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Arguments) -> Result<OreConfig, OreError> {
    #[cfg(feature = "env-file")]
    let mut config = OreConfig::from_env_file(&args.env_file)?;
    #[cfg(not(feature = "env-file"))]
    let mut config = OreConfig::from_env()?;

    if let Some(endpoint) = &args.endpoint {
        config = config.endpoint(endpoint.as_str())?;
    }
    if let Some(seconds) = args.session_duration {
        config = config.session_duration(Duration::from_secs(seconds));
    }
    Ok(config)
}

fn run(args: Arguments) -> Result<(), OreError> {
    let deployment = OreDeployment::new(load_config(&args)?)?;

    let result = match args.command {
        Command::Publish {
            project,
            file,
            channel,
            body,
            no_forum_post,
        } => {
            let mut request = PublishRequest::new(project, file)
                .version_body(body)
                .create_forum_post(!no_forum_post);
            if let Some(channel) = channel {
                request = request.channel(channel);
            }

            deployment.publish(&request).map(|version| {
                println!("Published version {} to {}", version.name, deployment.endpoint());
            })
        }
        Command::Permissions => deployment.permissions().map(|permissions| {
            println!("Key scope: {}", permissions.scope);
            for permission in &permissions.permissions {
                println!("  {}", permission);
            }
        }),
    };

    deployment.shutdown();
    result
}

fn report(error: &OreError) {
    match error.root() {
        OreError::ApiError { code, message } => {
            eprintln!(
                "[{}] {}",
                code,
                message.as_deref().unwrap_or("no message provided")
            );
        }
        _ => eprintln!("{}", error),
    }
}

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

use commands::{Exit, Format};

#[derive(Parser)]
#[command(
    name = "orbit",
    about = "Orbit — provision an ephemeral cluster, use it, nuke it from orbit",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Directory holding the session database
    #[arg(long, global = true, env = "ORBIT_STATE_DIR", default_value = ".orbit")]
    state_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a new session and wait until every resource is ready.
    ///
    /// Prints the published endpoints. Ctrl-C cancels provisioning and
    /// tears down whatever was created.
    Up {
        #[arg(short, long, default_value = "orbit.toml")]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Tear down a session (the latest open one by default)
    Down {
        #[arg(short, long)]
        session: Option<String>,
        /// Read retry and parallelism settings from this file if present
        #[arg(short, long, default_value = "orbit.toml")]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Show a session's state, resources, endpoints and leaks
    Status {
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// List all sessions
    List {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Forget DESTROYED sessions and remove their scratch directories
    Prune {
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Write a scaffold orbit.toml and its manifest templates
    Init {
        #[arg(short, long, default_value = "orbit.toml")]
        config: PathBuf,
        /// Session name (prefix of every cloud resource name)
        #[arg(long, default_value = "load-test")]
        name: String,
        /// GCP project to provision into
        #[arg(long, default_value = "my-project")]
        project: String,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,orbit=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let exit = if err.use_stderr() { Exit::Usage } else { Exit::Success };
            let _ = err.print();
            return exit.into();
        }
    };

    init_tracing(cli.json_logs);
    let state_dir = cli.state_dir;

    let result = match cli.command {
        Commands::Up { config, format } => commands::up::run(&state_dir, &config, format).await,
        Commands::Down {
            session,
            config,
            format,
        } => commands::down::run(&state_dir, session.as_deref(), &config, format).await,
        Commands::Status { session, format } => {
            commands::status::run(&state_dir, session.as_deref(), format).await
        }
        Commands::List { format } => commands::list::run(&state_dir, format),
        Commands::Prune { format } => commands::prune::run(&state_dir, format),
        Commands::Init {
            config,
            name,
            project,
            force,
        } => commands::init::run(&config, &name, &project, force),
    };

    match result {
        Ok(exit) => exit.into(),
        Err(err) => {
            eprintln!("error: {err:#}");
            commands::classify(&err).into()
        }
    }
}

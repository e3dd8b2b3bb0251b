//! Session agent binary: launch glue around [`keywarp_session::SessionAgent`].

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use keywarp_session::{launchd, AgentOptions, SessionAgent};

#[derive(Parser)]
#[command(name = "keywarp-session", about = "keywarp user-session agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the session agent (the default).
    Run,
    /// Install the per-user LaunchAgent and start it.
    Install,
    /// Stop the agent and remove the per-user LaunchAgent.
    Uninstall,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let home = dirs::home_dir().context("cannot resolve home directory")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Install => {
            let plist = launchd::install(&home)?;
            println!("installed {}", plist.display());
        }
        Command::Uninstall => {
            launchd::uninstall(&home)?;
            println!("uninstalled {}", keywarp_core::paths::SESSION_AGENT_LABEL);
        }
        Command::Run => run(home)?,
    }

    Ok(())
}

fn run(home: PathBuf) -> anyhow::Result<()> {
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;

    runtime.block_on(async move {
        let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<&'static str>();

        let mut options =
            AgentOptions::new(keywarp_core::paths::default_system_root(), home);
        let mismatch_tx = stop_tx.clone();
        options.on_version_mismatch = Box::new(move || {
            let _ = mismatch_tx.send("version mismatch");
        });

        let agent = SessionAgent::start(options);
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            uid = keywarp_session::current_uid(),
            "keywarp session agent started",
        );

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("sigterm handler")?;

        tokio::select! {
            reason = stop_rx.recv() => {
                tracing::info!(reason = reason.unwrap_or("stop"), "stopping session agent");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, stopping session agent");
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!("received ctrl-c, stopping session agent"),
                    Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
                }
            }
        }

        agent.shutdown().await.context("agent shutdown")?;
        Ok(())
    })
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

//! Main entry point for the testrig binary
//!
//! Wires the real process supervisor into the orchestrator, owns the root
//! cancellation token (cancelled on Ctrl+C) and dispatches subcommands.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use shared::{env, logging, process_info, Component};
use testrig::{
    config::{AuthorityArgs, Cli, Command},
    services::command::CommandSpec,
    BuildOrchestrator, CommandRunner, IdentityAuthority, Supervisor,
};

/// Identity registered for the current user by the `authority` command
const USER_IDENTITY: &str = "spiffe://example.org/test";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logging::init_tracing(Some(&cli.log_level));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(&Component::Harness, "Received Ctrl+C signal");
                on_signal.cancel();
            }
            Err(err) => logging::log_error(&Component::Harness, "Signal handling", &err),
        }
    });

    let supervisor = Arc::new(Supervisor::new(cancel.clone()));
    let workdir = std::env::current_dir().context("failed to resolve current directory")?;
    let orchestrator = BuildOrchestrator::new(supervisor.clone(), workdir);
    let skip_build = env::is_truthy(env::SKIP_BUILD);

    match cli.command {
        Command::Build(args) => {
            logging::log_startup(&Component::Builder, "build target");
            orchestrator
                .perform_build(&args.targets, &args.options(skip_build))
                .await
                .context("build failed")?;
        }
        Command::Test(args) => {
            logging::log_startup(&Component::Runner, "test target");
            if orchestrator.inside_container() {
                let options = args.options(
                    skip_build,
                    std::env::var(env::TEST_PACKAGE).ok(),
                    std::env::var(env::TEST_DEBUG).ok(),
                );
                orchestrator
                    .run_tests_in_container(&options, &cancel)
                    .await
                    .context("tests failed")?;
            } else {
                let options = args.options(skip_build, None, None);
                orchestrator
                    .run_tests_on_host(&args.targets, &options)
                    .await
                    .context("tests failed")?;
            }
        }
        Command::List(args) => {
            logging::log_startup(&Component::Discovery, "list target");
            orchestrator
                .list_tests(&args.targets, &args.toolchain.toolchain())
                .await
                .context("listing failed")?;
        }
        Command::Authority(args) => {
            logging::log_startup(&Component::AuthorityServer, "identity authority with default settings");
            run_authority(supervisor.as_ref(), &args, &cancel).await?;
        }
        Command::Do(args) => {
            process_info!(Component::Harness, "do target: {}", args.command.join(" "));
            orchestrator
                .run_step(&args.command, skip_build)
                .await
                .with_context(|| format!("`{}` failed", args.command.join(" ")))?;
        }
    }

    logging::log_success(&Component::Harness, "Done");
    Ok(())
}

/// Boot an authority, register the current user and serve until interrupted
async fn run_authority(supervisor: &Supervisor, args: &AuthorityArgs, cancel: &CancellationToken) -> anyhow::Result<()> {
    let authority = IdentityAuthority::new(args.config())?;
    let endpoint = authority
        .start(cancel)
        .await
        .context("failed to run identity authority")?;

    let registered = async {
        let uid = supervisor
            .exec_read(&CommandSpec::new(["id", "-u"]).echo(false))
            .await?
            .into_iter()
            .next()
            .context("`id -u` printed nothing")?;
        authority
            .add_entry(&args.agent_id, USER_IDENTITY, &format!("unix:uid:{uid}"))
            .await
            .context("failed to add entry to identity authority")
    };
    if let Err(e) = registered.await {
        authority.stop().await;
        return Err(e);
    }

    // Outermost boundary: external tooling expects the variable to be set
    endpoint.export();
    println!(
        "\n\n************\n\nIdentity authority is up and running, please set ENV variable:\n{endpoint}\n\n\n*********"
    );

    authority.stopped().await?;
    Ok(())
}

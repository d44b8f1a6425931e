mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use uipilot::{Plan, RunConfig, RunOutcome, goal};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(Some(outcome)) if outcome.success() => ExitCode::SUCCESS,
        Ok(Some(_)) => ExitCode::from(1),
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "uipilot=info",
        1 => "uipilot=debug",
        _ => "uipilot=trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .init();
}

async fn run(cli: Cli) -> Result<Option<RunOutcome>> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RunConfig::default(),
    };
    config.apply_env();
    cli.overrides.apply(&mut config);

    let plan = match cli.command {
        Commands::Run { plan } => {
            Plan::load(&plan).with_context(|| format!("loading plan {}", plan.display()))?
        }
        Commands::CreateProject { goal: text, url, dry_run } => {
            let name = goal::extract_project_name(&text).unwrap_or_else(goal::fallback_name);
            info!(goal = %text, %name, "parsed intent: create project");
            let plan = goal::create_project_plan(&url, &name)?;
            if dry_run {
                println!("{}", serde_json::to_string_pretty(plan.steps())?);
                return Ok(None);
            }
            plan
        }
    };

    // headless_chrome is blocking; keep it off the async workers.
    let outcome = tokio::task::spawn_blocking(move || uipilot::run(&config, &plan))
        .await
        .map_err(|e| anyhow::anyhow!("run panicked: {e}"))??;

    print!("{}", outcome.report.summary());
    println!("diagnostics: {}", outcome.log_path.display());
    if !outcome.state_saved {
        println!("warning: session state was not saved");
    }
    Ok(Some(outcome))
}

mod cli;
mod ui;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};

use stepflow::logging;
use stepflow::{JobCatalog, LocalAdapter, Run, RunConfig, WorkflowState};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RunConfig::load(cli.config.as_deref())?;
    if cli.debug {
        config.debug = true;
    }

    match cli.command {
        Command::Run {
            directory,
            osw,
            preserve_run_dir,
        } => {
            if preserve_run_dir {
                config.preserve_run_dir = true;
            }
            run_workflow(config, &directory, osw, cli.quiet)
        }
        Command::Graph => {
            let _guard = logging::init(&config.targets, config.debug, None);
            let graph = config.graph().context("invalid state graph")?;
            ui::print_graph(&graph);
            Ok(())
        }
        Command::Jobs => {
            for name in JobCatalog::builtin().names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn run_workflow(
    config: RunConfig,
    directory: &Path,
    osw: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let mut adapter = LocalAdapter::new();
    if let Some(osw) = osw {
        adapter = adapter.with_osw_path(osw);
    }

    let targets = config.targets.clone();
    let debug = config.debug;
    let mut run = Run::new(adapter, directory, config, JobCatalog::builtin())
        .with_context(|| format!("failed to set up workflow in {}", directory.display()))?;
    // The run directory has been prepared, so `run.log` is not cleared under us.
    let _guard = logging::init(&targets, debug, Some(run.run_directory().as_path()));

    let progress = ui::RunProgress::start(&directory.display().to_string(), quiet);
    let outcome = run.run_with(|event| progress.update(event));
    progress.complete(&run.summary());

    let state = outcome.context("failed to finalize workflow")?;
    if state == WorkflowState::Errored {
        bail!("workflow errored: {}", run.final_message());
    }
    Ok(())
}

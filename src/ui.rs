//! Interface de terminal do stepflow: spinner e saída colorida.
//!
//! Usa as crates `indicatif` para o spinner de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente os
//! passos de uma execução no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use stepflow::StepEvent;
use stepflow::state_machine::{StateGraph, WorkflowState};
use stepflow::summary::{CompletedStatus, RunSummary};

/// Indicador visual de progresso para uma execução de workflow.
///
/// Exibe um spinner com o estado atual e uma linha colorida por passo
/// concluído: verde para sucesso, vermelho para falha.
pub struct RunProgress {
    // Spinner do indicatif; oculto no modo silencioso.
    pb: ProgressBar,
    quiet: bool,
    green: Style,
    red: Style,
    dim: Style,
}

impl RunProgress {
    /// Inicia o spinner para o workflow em `directory`.
    pub fn start(directory: &str, quiet: bool) -> Self {
        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("queued: {directory}"));
        if !quiet {
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
        }

        Self {
            pb,
            quiet,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza o spinner ou imprime o passo concluído.
    pub fn update(&self, event: StepEvent<'_>) {
        match event {
            StepEvent::Entering { state } => self.pb.set_message(format!("{state}")),
            StepEvent::Completed { record } => {
                if self.quiet {
                    return;
                }
                let elapsed = self.dim.apply_to(format!("({} ms)", record.duration_ms()));
                match &record.result.error {
                    None => self.pb.println(format!(
                        "  {} {} [{}] {elapsed}",
                        self.green.apply_to("✓"),
                        record.state,
                        record.job
                    )),
                    Some(error) => self.pb.println(format!(
                        "  {} {} [{}] {error}",
                        self.red.apply_to("✗"),
                        record.state,
                        record.job
                    )),
                }
            }
        }
    }

    /// Finaliza o spinner e exibe o estado final da execução.
    pub fn complete(&self, summary: &RunSummary) {
        self.pb.finish_and_clear();
        if self.quiet {
            return;
        }
        match summary.completed_status {
            CompletedStatus::Success => {
                println!("  {} Workflow finished", self.green.apply_to("✓"));
            }
            CompletedStatus::Fail => {
                println!(
                    "  {} Workflow errored: {}",
                    self.red.apply_to("✗"),
                    summary.final_message
                );
            }
        }
        println!(
            "  {}",
            self.dim
                .apply_to(format!("run directory: {}", summary.run_directory.display()))
        );
    }
}

/// Imprime o caminho de estados com o job de cada estado.
pub fn print_graph(graph: &StateGraph) {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    for state in graph.path() {
        match graph.binding(state) {
            Some(job) => println!("{} {}", bold.apply_to(state), dim.apply_to(format!("→ {job}"))),
            None => println!("{}", bold.apply_to(state)),
        }
    }
    println!("{}", dim.apply_to(WorkflowState::Errored));
}

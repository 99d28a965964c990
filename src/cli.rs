//! Interface de linha de comando do stepflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, graph, jobs)
//! e flags globais (--config, --debug, --quiet).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// stepflow — Orquestrador de workflows por máquina de estados.
#[derive(Debug, Parser)]
#[command(name = "stepflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: `stepflow.toml` no diretório atual).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita o modo debug: log detalhado e snapshot do registry por job.
    #[arg(long, short, global = true, default_value_t = false)]
    pub debug: bool,

    /// Suprime o spinner e o resumo no terminal.
    #[arg(long, short, global = true, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa o workflow do diretório informado.
    Run {
        /// Diretório contendo o workflow (padrão: diretório atual).
        #[arg(default_value = ".")]
        directory: PathBuf,

        /// Caminho explícito do documento OSW.
        #[arg(long)]
        osw: Option<PathBuf>,

        /// Mantém o conteúdo existente do diretório de execução.
        #[arg(long, default_value_t = false)]
        preserve_run_dir: bool,
    },

    /// Mostra o caminho de estados e o job associado a cada um.
    Graph,

    /// Lista os jobs disponíveis no catálogo.
    Jobs,
}

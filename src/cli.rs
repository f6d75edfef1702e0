//! Interface de linha de comando do batchwatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (submit, monitor, watch)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// batchwatch: submete jobs a clusters grid-engine e acompanha sua execução.
#[derive(Debug, Parser)]
#[command(name = "batchwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração (padrão: `batchwatch.toml` no diretório atual).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Registros de cluster e de job em JSON, como guardados pelo serviço de status.
#[derive(Debug, Clone, Args)]
pub struct Records {
    /// Arquivo JSON com o registro do cluster.
    #[arg(long)]
    pub cluster: PathBuf,

    /// Arquivo JSON com o registro do job.
    #[arg(long)]
    pub job: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete o job ao escalonador do cluster.
    Submit {
        #[command(flatten)]
        records: Records,

        /// Continua acompanhando o job após a submissão.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Executa um único passo de monitoramento e imprime a próxima ação em JSON.
    Monitor {
        #[command(flatten)]
        records: Records,

        /// Passos de monitoramento já executados.
        #[arg(long, default_value_t = 0)]
        attempt: u32,

        /// Falhas transitórias consecutivas até aqui.
        #[arg(long, default_value_t = 0)]
        transient_failures: u32,
    },

    /// Acompanha o job até um status final.
    Watch {
        #[command(flatten)]
        records: Records,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_submit_subcommand() {
        let cli = Cli::parse_from([
            "batchwatch",
            "submit",
            "--cluster",
            "cluster.json",
            "--job",
            "job.json",
        ]);
        match cli.command {
            Command::Submit { records, watch } => {
                assert_eq!(records.cluster, PathBuf::from("cluster.json"));
                assert_eq!(records.job, PathBuf::from("job.json"));
                assert!(!watch);
            }
            _ => panic!("expected Submit command"),
        }
    }

    #[test]
    fn cli_parses_monitor_context() {
        let cli = Cli::parse_from([
            "batchwatch",
            "monitor",
            "--cluster",
            "c.json",
            "--job",
            "j.json",
            "--attempt",
            "4",
            "--transient-failures",
            "1",
        ]);
        match cli.command {
            Command::Monitor {
                attempt,
                transient_failures,
                ..
            } => {
                assert_eq!(attempt, 4);
                assert_eq!(transient_failures, 1);
            }
            _ => panic!("expected Monitor command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "batchwatch",
            "--config",
            "/etc/batchwatch.toml",
            "--verbose",
            "watch",
            "--cluster",
            "c.json",
            "--job",
            "j.json",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/batchwatch.toml")));
        assert!(matches!(cli.command, Command::Watch { .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}

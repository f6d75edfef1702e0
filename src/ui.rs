//! Interface de terminal do batchwatch: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`WatchProgress`] acompanha visualmente
//! o monitoramento de um job no terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::MonitorAction;
use crate::model::{JobDescriptor, JobStatus, OutputSpec};

/// Indicador visual de progresso para o monitoramento de um job.
///
/// Exibe um spinner animado enquanto o job está no escalonador, imprime
/// as linhas novas das saídas acompanhadas e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e retentativa (amarelo).
pub struct WatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    // Linhas já impressas por saída acompanhada, na ordem de `job.output`.
    printed: Vec<usize>,
}

impl WatchProgress {
    /// Inicia o spinner com o nome do job.
    pub fn start(job: &JobDescriptor) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("{} ({}): waiting", job.name, job.id));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            printed: Vec::new(),
        }
    }

    /// Atualiza o spinner após um passo de monitoramento.
    pub fn step(&mut self, job: &JobDescriptor, action: &MonitorAction) {
        self.print_new_lines(job);

        let status = job.status.map_or("unknown", JobStatus::as_str);
        match action {
            MonitorAction::Reschedule { after, context } if context.transient_failures > 0 => {
                self.pb.println(format!(
                    "  {} Retry {} in {}s",
                    self.yellow.apply_to("↻"),
                    context.transient_failures,
                    after.as_secs()
                ));
            }
            MonitorAction::Reschedule { after, .. } => {
                self.pb.set_message(format!(
                    "{} ({}): {status}, next poll in {}s",
                    job.name,
                    job.id,
                    after.as_secs()
                ));
            }
            MonitorAction::Stop { .. } => {}
        }
    }

    /// Finaliza o spinner e exibe o status final do job.
    pub fn finish(&self, status: JobStatus) {
        self.pb.finish_and_clear();
        match status {
            JobStatus::Complete | JobStatus::Uploading => {
                println!("  {} Job finished: {status}", self.green.apply_to("✓"));
            }
            JobStatus::Terminated => {
                println!("  {} Job cancelled", self.yellow.apply_to("■"));
            }
            _ => {
                println!("  {} Job ended: {status}", self.red.apply_to("✗"));
            }
        }
    }

    // Imprime somente as linhas que ainda não foram exibidas.
    fn print_new_lines(&mut self, job: &JobDescriptor) {
        let tails = job.output.iter().filter_map(|o| match o {
            OutputSpec::File(file) if file.tail => Some(file),
            _ => None,
        });
        for (index, file) in tails.enumerate() {
            if self.printed.len() <= index {
                self.printed.push(0);
            }
            for line in file.content.iter().skip(self.printed[index]) {
                self.pb
                    .println(format!("  {} {line}", self.dim.apply_to(&file.path)));
            }
            self.printed[index] = file.content.len();
        }
    }
}

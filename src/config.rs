//! Configuração do batchwatch carregada a partir de `batchwatch.toml`.
//!
//! A struct [`BatchwatchConfig`] agrupa os parâmetros por seção
//! (`[status]`, `[ssh]`, `[scheduler]`, `[retry]`, `[upload]`).
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `BATCHWATCH_TOKEN` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BatchError, ConfigError};

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "batchwatch.toml";

/// Variável de ambiente com o token do serviço de status.
pub const TOKEN_ENV: &str = "BATCHWATCH_TOKEN";

/// Configuração de nível superior carregada de `batchwatch.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchwatchConfig {
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Acesso ao serviço de status dos jobs.
#[derive(Clone, Deserialize)]
pub struct StatusConfig {
    /// URL base da API, sem barra final.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token enviado no cabeçalho `Girder-Token`.
    #[serde(default)]
    pub token: String,

    /// Tempo máximo de cada requisição, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

// O token nunca aparece em logs.
impl std::fmt::Debug for StatusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Conexão SSH com o nó mestre dos clusters.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Diretório com as chaves privadas, uma por id de cluster.
    #[serde(default = "default_key_store")]
    pub key_store: PathBuf,

    /// Usuário de login em clusters provisionados na nuvem.
    #[serde(default = "default_ec2_user")]
    pub ec2_user: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Tempo máximo de um comando remoto, em segundos.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// Ambiente paralelo usado em clusters na nuvem quando o job não pede outro.
    #[serde(default = "default_parallel_environment")]
    pub default_parallel_environment: String,
}

/// Parâmetros do reagendamento do monitoramento.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    /// Atraso base em milissegundos; dobra a cada falha transitória.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Teto do atraso em milissegundos.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Falhas transitórias consecutivas toleradas antes de marcar o job como `error`.
    #[serde(default = "default_max_transient_failures")]
    pub max_transient_failures: u32,

    /// Limite opcional de ciclos de monitoramento por job.
    #[serde(default)]
    pub max_polls: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadConfig {
    /// Endpoint que dispara o upload das saídas. Quando ausente usa
    /// `{base_url}/jobs/{id}/upload`.
    #[serde(default)]
    pub endpoint: Option<String>,
}

// Valor padrão da URL base: servidor local.
fn default_base_url() -> String {
    "http://localhost:8080/api/v1".to_string()
}

// Valor padrão do timeout de requisição: 30s.
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_key_store() -> PathBuf {
    PathBuf::from("keyStore")
}

fn default_ec2_user() -> String {
    "ubuntu".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    60
}

// Ambiente paralelo provisionado nos clusters na nuvem.
fn default_parallel_environment() -> String {
    "orte".to_string()
}

// Valor padrão para o atraso base: 5s.
fn default_base_delay_ms() -> u64 {
    5_000
}

// Valor padrão para o teto do atraso: 5min.
fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_max_transient_failures() -> u32 {
    5
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_store: default_key_store(),
            ec2_user: default_ec2_user(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_parallel_environment: default_parallel_environment(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_transient_failures: default_max_transient_failures(),
            max_polls: None,
        }
    }
}

impl StatusConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl UploadConfig {
    /// URL que dispara o upload das saídas do job `job_id`.
    pub fn endpoint_for(&self, base_url: &str, job_id: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.replace("{id}", job_id),
            None => format!("{}/jobs/{job_id}/upload", base_url.trim_end_matches('/')),
        }
    }
}

impl BatchwatchConfig {
    /// Carrega a configuração de `path`, ou de `batchwatch.toml` no diretório atual.
    /// Usa valores padrão se o arquivo padrão não existir; um caminho explícito
    /// inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self, BatchError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    Self::default()
                }
            }
        };

        // Variável de ambiente tem precedência sobre o arquivo para o token.
        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            config.status.token = token;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, BatchError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<BatchwatchConfig>(&contents)?)
    }

    /// Rejeita combinações que tornariam o reagendamento inválido.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        if self.status.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("status.base_url is empty".into()));
        }
        Ok(())
    }
}

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult, Handle, Handler};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{Connector, RemoteExecutor, RemoteSession, shell_quote};
use crate::config::SshConfig;
use crate::error::{BatchError, ConfigError, ParseError, RemoteError};
use crate::model::{ClusterDescriptor, ClusterType};

/// Accepts any host key.
// TODO: pin master host keys in a known_hosts file under the key store.
#[derive(Clone, Debug, Default)]
pub struct ClientHandler;

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Where and as whom to log in on a cluster's master node.
#[derive(Clone, PartialEq, Eq)]
struct LoginTarget {
    host: String,
    port: u16,
    user: String,
    key_path: PathBuf,
    passphrase: Option<String>,
}

impl fmt::Debug for LoginTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("key_path", &self.key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opens russh sessions to master nodes.
///
/// Elastic-cloud clusters are reached with the key pair we generated for
/// them; traditional clusters with the user-supplied login and the key
/// installed for that cluster. Both keys live in the key store, named by
/// cluster id.
#[derive(Debug, Clone)]
pub struct SshConnector {
    key_store: PathBuf,
    ec2_user: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshConnector {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            key_store: config.key_store.clone(),
            ec2_user: config.ec2_user.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    fn target(&self, cluster: &ClusterDescriptor) -> Result<LoginTarget, ConfigError> {
        let host = cluster
            .config
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingHost(cluster.id.clone()))?;
        let port = cluster.config.port.unwrap_or(self.port);
        let key_path = self.key_store.join(&cluster.id);

        let (user, passphrase) = match cluster.cluster_type {
            ClusterType::Ec2 => (self.ec2_user.clone(), None),
            ClusterType::Traditional => {
                let ssh = cluster
                    .config
                    .ssh
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingCredentials(cluster.id.clone()))?;
                let user = ssh
                    .user
                    .clone()
                    .ok_or_else(|| ConfigError::MissingCredentials(cluster.id.clone()))?;
                (user, ssh.passphrase.clone())
            }
        };

        Ok(LoginTarget {
            host,
            port,
            user,
            key_path,
            passphrase,
        })
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, cluster: &ClusterDescriptor) -> Result<SshSession, BatchError> {
        let target = self.target(cluster)?;
        info!(
            cluster_id = %cluster.id,
            host = %target.host,
            user = %target.user,
            "connecting to master node"
        );

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.command_timeout * 2),
            ..Default::default()
        });

        let connecting = client::connect(
            config,
            (target.host.as_str(), target.port),
            ClientHandler,
        );
        let mut handle = timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| RemoteError::Timeout {
                seconds: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| RemoteError::Connect {
                host: target.host.clone(),
                message: e.to_string(),
            })?;

        let key = load_secret_key(&target.key_path, target.passphrase.as_deref())
            .map_err(|e| RemoteError::Key(format!("{}: {e}", target.key_path.display())))?;
        let hash = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?
            .flatten();
        let auth = handle
            .authenticate_publickey(
                target.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash),
            )
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        if !matches!(auth, AuthResult::Success) {
            return Err(RemoteError::Auth {
                user: target.user,
                host: target.host,
            }
            .into());
        }

        debug!(host = %target.host, "authenticated");
        Ok(SshSession {
            handle: Mutex::new(handle),
            host: target.host,
            command_timeout: self.command_timeout,
        })
    }
}

/// One authenticated connection; commands run one at a time.
pub struct SshSession {
    handle: Mutex<Handle<ClientHandler>>,
    host: String,
    command_timeout: Duration,
}

struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl SshSession {
    async fn capture(&self, command: &str) -> Result<Captured, RemoteError> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| RemoteError::Channel(e.to_string()))?;

        let mut captured = Captured {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: None,
        };
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => captured.stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                    captured.stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status } => captured.exit_status = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        let _ = channel.close().await;
        Ok(captured)
    }
}

impl RemoteExecutor for SshSession {
    async fn execute_raw(&self, command: &str) -> Result<Vec<u8>, RemoteError> {
        debug!(host = %self.host, command, "executing");
        let captured = timeout(self.command_timeout, self.capture(command))
            .await
            .map_err(|_| RemoteError::Timeout {
                seconds: self.command_timeout.as_secs(),
            })??;
        finish(command, captured)
    }

    async fn file_size(&self, path: &str) -> Result<Option<u64>, BatchError> {
        let quoted = shell_quote(path);
        let lines = self
            .execute(&format!("if [ -e {quoted} ]; then stat -c %s {quoted}; fi"))
            .await?;
        parse_file_size(path, &lines)
    }
}

impl RemoteSession for SshSession {
    async fn close(self) {
        let handle = self.handle.into_inner();
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            warn!(host = %self.host, error = %e, "disconnect failed");
        }
    }
}

// A channel that closes without an exit status was torn down, e.g. by a
// signal, and its stdout cannot be trusted.
fn finish(command: &str, captured: Captured) -> Result<Vec<u8>, RemoteError> {
    match captured.exit_status {
        Some(0) => Ok(captured.stdout),
        Some(code) => Err(RemoteError::NonZeroExit {
            command: command.to_string(),
            code,
            stderr: String::from_utf8_lossy(&captured.stderr).trim().to_string(),
        }),
        None => Err(RemoteError::Channel(format!(
            "`{command}` ended without an exit status"
        ))),
    }
}

fn parse_file_size(path: &str, lines: &[String]) -> Result<Option<u64>, BatchError> {
    match lines.iter().map(|l| l.trim()).find(|l| !l.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse::<u64>().map(Some).map_err(|_| {
            ParseError::InvalidFileSize {
                path: path.to_string(),
                value: value.to_string(),
            }
            .into()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClusterConfig, SchedulerConfig, SchedulerType, SshSettings};

    fn connector() -> SshConnector {
        SshConnector::new(&SshConfig {
            key_store: PathBuf::from("/keys"),
            ..SshConfig::default()
        })
    }

    fn cluster(cluster_type: ClusterType, ssh: Option<SshSettings>) -> ClusterDescriptor {
        ClusterDescriptor {
            id: "c1".into(),
            name: "c1".into(),
            cluster_type,
            config: ClusterConfig {
                host: Some("master.example.org".into()),
                port: None,
                ssh,
                scheduler: SchedulerConfig {
                    scheduler_type: SchedulerType::Sge,
                },
            },
        }
    }

    #[test]
    fn ec2_clusters_use_the_managed_login() {
        let target = connector().target(&cluster(ClusterType::Ec2, None)).unwrap();
        assert_eq!(target.user, "ubuntu");
        assert_eq!(target.port, 22);
        assert_eq!(target.key_path, PathBuf::from("/keys/c1"));
        assert!(target.passphrase.is_none());
    }

    #[test]
    fn traditional_clusters_use_the_supplied_login() {
        let ssh = SshSettings {
            user: Some("alice".into()),
            passphrase: Some("its a secret".into()),
        };
        let mut cluster = cluster(ClusterType::Traditional, Some(ssh));
        cluster.config.port = Some(2222);

        let target = connector().target(&cluster).unwrap();
        assert_eq!(target.user, "alice");
        assert_eq!(target.port, 2222);
        assert_eq!(target.passphrase.as_deref(), Some("its a secret"));
    }

    #[test]
    fn login_target_debug_hides_the_passphrase() {
        let ssh = SshSettings {
            user: Some("alice".into()),
            passphrase: Some("its a secret".into()),
        };
        let target = connector()
            .target(&cluster(ClusterType::Traditional, Some(ssh)))
            .unwrap();
        let printed = format!("{target:?}");
        assert!(printed.contains("alice"));
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("its a secret"));
    }

    #[test]
    fn traditional_cluster_without_user_is_rejected() {
        let err = connector()
            .target(&cluster(ClusterType::Traditional, None))
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredentials("c1".into()));
    }

    #[test]
    fn missing_host_is_rejected() {
        let mut cluster = cluster(ClusterType::Ec2, None);
        cluster.config.host = None;
        let err = connector().target(&cluster).unwrap_err();
        assert_eq!(err, ConfigError::MissingHost("c1".into()));
    }

    fn captured(stdout: &[u8], exit_status: Option<u32>) -> Captured {
        Captured {
            stdout: stdout.to_vec(),
            stderr: b"qstat: oops\n".to_vec(),
            exit_status,
        }
    }

    #[test]
    fn exit_status_decides_the_outcome() {
        assert_eq!(finish("qstat", captured(b"ok\n", Some(0))).unwrap(), b"ok\n");
        assert!(matches!(
            finish("qstat", captured(b"", Some(2))),
            Err(RemoteError::NonZeroExit { code: 2, ref stderr, .. }) if stderr == "qstat: oops"
        ));
    }

    #[test]
    fn missing_exit_status_is_a_channel_error() {
        let err = finish("qstat", captured(b"partial", None)).unwrap_err();
        assert!(matches!(err, RemoteError::Channel(ref m) if m.contains("qstat")));
    }

    #[test]
    fn file_size_parsing() {
        assert_eq!(parse_file_size("p", &[]).unwrap(), None);
        assert_eq!(parse_file_size("p", &["  ".into()]).unwrap(), None);
        assert_eq!(parse_file_size("p", &["1024".into()]).unwrap(), Some(1024));
        assert!(matches!(
            parse_file_size("p", &["stat: oops".into()]),
            Err(BatchError::Parse(ParseError::InvalidFileSize { .. }))
        ));
    }
}

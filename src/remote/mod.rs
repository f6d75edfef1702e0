//! Command execution on a cluster's master node.
//!
//! [`Connector`] opens a [`RemoteSession`] for one cluster; a session runs
//! commands until it is closed. Callers go through [`with_session`] so the
//! connection is released on every exit path.

pub mod ssh;
pub mod tail;

use std::future::Future;

use crate::error::{BatchError, RemoteError};
use crate::model::ClusterDescriptor;

pub use ssh::SshConnector;
pub use tail::TailReader;

/// Runs shell commands on the master node.
pub trait RemoteExecutor: Send + Sync {
    /// Executes `command` and returns its stdout as received.
    /// A non-zero exit status is a [`RemoteError::NonZeroExit`].
    fn execute_raw(&self, command: &str)
    -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;

    /// Like [`execute_raw`](Self::execute_raw), with stdout split into lines.
    fn execute(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<Vec<String>, RemoteError>> + Send {
        async move { Ok(split_lines(&self.execute_raw(command).await?)) }
    }

    /// Size in bytes of a remote file, `None` when it does not exist.
    fn file_size(&self, path: &str)
    -> impl Future<Output = Result<Option<u64>, BatchError>> + Send;
}

/// An open connection that must be closed once the caller is done.
pub trait RemoteSession: RemoteExecutor {
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions to a cluster's master node.
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    fn connect(
        &self,
        cluster: &ClusterDescriptor,
    ) -> impl Future<Output = Result<Self::Session, BatchError>> + Send;
}

/// Opens a session, runs `work` against it and closes it whatever the outcome.
pub async fn with_session<C, T, F>(
    connector: &C,
    cluster: &ClusterDescriptor,
    work: F,
) -> Result<T, BatchError>
where
    C: Connector,
    F: AsyncFnOnce(&C::Session) -> Result<T, BatchError>,
{
    let session = connector.connect(cluster).await?;
    let result = work(&session).await;
    session.close().await;
    result
}

/// Decodes command output into lines, dropping `\r\n` endings.
pub(crate) fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Quotes `value` for safe interpolation into a POSIX shell command.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}


#[cfg(test)]
mod tests {
    use super::mock::MockRemote;
    use super::*;
    use crate::model::{ClusterConfig, ClusterType, SchedulerConfig, SchedulerType};

    fn cluster() -> ClusterDescriptor {
        ClusterDescriptor {
            id: "c1".into(),
            name: "c1".into(),
            cluster_type: ClusterType::Ec2,
            config: ClusterConfig {
                host: Some("10.0.0.1".into()),
                port: None,
                ssh: None,
                scheduler: SchedulerConfig {
                    scheduler_type: SchedulerType::Sge,
                },
            },
        }
    }

    #[test]
    fn shell_quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("qstat"), "qstat");
        assert_eq!(shell_quote("./42/out.log"), "./42/out.log");
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("echo hi"), "'echo hi'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn split_lines_handles_crlf_and_trailing_newline() {
        assert_eq!(split_lines(b"a\r\nb\n"), vec!["a", "b"]);
        assert!(split_lines(b"").is_empty());
    }

    #[tokio::test]
    async fn with_session_closes_on_success() {
        let remote = MockRemote::new();
        remote.respond(&["ok"]);

        let out = with_session(&remote, &cluster(), async |s: &MockRemote| {
            Ok(s.execute("true").await?)
        })
        .await
        .unwrap();

        assert_eq!(out, vec!["ok".to_string()]);
        assert_eq!(remote.connects(), 1);
        assert_eq!(remote.closes(), 1);
    }

    #[tokio::test]
    async fn with_session_closes_on_error() {
        let remote = MockRemote::new();
        remote.fail(RemoteError::Timeout { seconds: 1 });

        let result = with_session(&remote, &cluster(), async |s: &MockRemote| {
            Ok(s.execute("sleep 100").await?)
        })
        .await;

        assert!(matches!(
            result,
            Err(BatchError::RemoteExecution(RemoteError::Timeout { .. }))
        ));
        assert_eq!(remote.closes(), 1);
    }

    #[tokio::test]
    async fn failed_connect_has_nothing_to_close() {
        let remote = MockRemote::new();
        remote.state.lock().unwrap().fail_connect = true;

        let result = with_session(&remote, &cluster(), async |_s: &MockRemote| Ok(())).await;

        assert!(result.is_err());
        assert_eq!(remote.closes(), 0);
    }
}

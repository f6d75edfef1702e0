use std::fmt;

use serde::{Deserialize, Serialize};

/// How the cluster was brought up, which decides how we reach its master node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterType {
    /// Provisioned by us on an elastic cloud; we hold the key pair.
    #[serde(rename = "ec2")]
    Ec2,
    /// A user-supplied machine reachable with the user's own credentials.
    #[serde(rename = "trad")]
    Traditional,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterType::Ec2 => write!(f, "ec2"),
            ClusterType::Traditional => write!(f, "trad"),
        }
    }
}

/// Batch scheduler flavour running on the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    Sge,
}

impl fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerType::Sge => write!(f, "sge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(rename = "type")]
    pub scheduler_type: SchedulerType,
}

/// Login settings for traditional clusters.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSettings {
    #[serde(default)]
    pub user: Option<String>,
    /// Passphrase protecting the cluster's private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSettings")
            .field("user", &self.user)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Master node address.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ssh: Option<SshSettings>,
    pub scheduler: SchedulerConfig,
}

/// A cluster record as handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub cluster_type: ClusterType,
    pub config: ClusterConfig,
}

impl ClusterDescriptor {
    pub fn scheduler_type(&self) -> SchedulerType {
        self.config.scheduler.scheduler_type
    }
}

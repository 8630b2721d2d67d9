//! Single-host vs. cluster behaviour, chosen once at startup
//!
//! The dispatcher and finalizer never branch on the mode; they ask the
//! topology where each node lives and how to reach it.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::debug;

use super::ssh::shell_quote;
use crate::config::{RemoteHost, RestoreConfig};
use crate::core::{NodeId, Partition};
use crate::error::Result;

/// Generated ssh client config for cluster node access
pub const SSH_CONFIG_FILE: &str = "ssh_config";

/// Where one node's partition is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub node: NodeId,
    /// Host name handed to the transfer tool
    pub address: String,
}

/// Remote shell the transfer tool uses to reach targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub ssh_program: String,
    pub ssh_args: Vec<String>,
}

impl TransportConfig {
    /// Single string form for `rsync -e`
    pub fn remote_shell(&self) -> String {
        let mut words = vec![shell_quote(&self.ssh_program)];
        words.extend(self.ssh_args.iter().map(|a| shell_quote(a)));
        words.join(" ")
    }
}

pub trait Topology: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the finalize phase runs
    fn is_cluster(&self) -> bool;

    /// One target per node in the partition, in partition order
    fn discover_targets(&self, partition: &Partition) -> Vec<TransferTarget>;

    /// Build the remote shell configuration, writing any support files
    /// into `scratch_dir`
    fn transport_config(
        &self,
        targets: &[TransferTarget],
        scratch_dir: &Path,
    ) -> Result<TransportConfig>;
}

/// Select the topology matching the configured mode
pub fn select_topology(config: &RestoreConfig) -> Result<Box<dyn Topology>> {
    let host = config.remote_host()?;
    let topology: Box<dyn Topology> = if config.cluster {
        Box::new(ClusterTopology {
            head: host,
            ssh_program: config.ssh_program.clone(),
            ssh_user: config.ssh_user.clone(),
            extra_opts: config.extra_ssh_opts.clone(),
            node_port: config.ssh_port,
        })
    } else {
        Box::new(SingleHostTopology {
            host,
            ssh_program: config.ssh_program.clone(),
            ssh_user: config.ssh_user.clone(),
            extra_opts: config.extra_ssh_opts.clone(),
        })
    };
    debug!("Using {} topology", topology.name());
    Ok(topology)
}

/// Every node id the oracle names is the appliance itself
#[derive(Debug, Clone)]
pub struct SingleHostTopology {
    pub host: RemoteHost,
    pub ssh_program: String,
    pub ssh_user: String,
    pub extra_opts: Vec<String>,
}

impl Topology for SingleHostTopology {
    fn name(&self) -> &'static str {
        "single-host"
    }

    fn is_cluster(&self) -> bool {
        false
    }

    fn discover_targets(&self, partition: &Partition) -> Vec<TransferTarget> {
        partition
            .nodes()
            .map(|node| TransferTarget {
                node: node.clone(),
                address: self.host.name.clone(),
            })
            .collect()
    }

    fn transport_config(
        &self,
        _targets: &[TransferTarget],
        _scratch_dir: &Path,
    ) -> Result<TransportConfig> {
        let mut ssh_args = vec![
            "-p".to_string(),
            self.host.port.to_string(),
            "-l".to_string(),
            self.ssh_user.clone(),
        ];
        ssh_args.extend(self.extra_opts.iter().cloned());
        Ok(TransportConfig {
            ssh_program: self.ssh_program.clone(),
            ssh_args,
        })
    }
}

/// Node ids are cluster host names reached through the head node
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    pub head: RemoteHost,
    pub ssh_program: String,
    pub ssh_user: String,
    pub extra_opts: Vec<String>,
    /// ssh port the storage nodes listen on
    pub node_port: u16,
}

impl ClusterTopology {
    /// ssh client config proxying every target through the head node
    pub fn ssh_config(&self, targets: &[TransferTarget]) -> String {
        let mut proxy = vec![
            shell_quote(&self.ssh_program),
            "-q".to_string(),
            "-p".to_string(),
            self.head.port.to_string(),
            "-l".to_string(),
            shell_quote(&self.ssh_user),
        ];
        proxy.extend(self.extra_opts.iter().map(|o| shell_quote(o)));
        proxy.push(shell_quote(&self.head.name));
        proxy.push("nc.openbsd %h %p".to_string());
        let proxy = proxy.join(" ");

        let mut out = String::new();
        for target in targets {
            let _ = writeln!(out, "Host {}", target.address);
            let _ = writeln!(out, "  User {}", self.ssh_user);
            let _ = writeln!(out, "  Port {}", self.node_port);
            let _ = writeln!(out, "  ServerAliveInterval 60");
            let _ = writeln!(out, "  StrictHostKeyChecking no");
            let _ = writeln!(out, "  ProxyCommand {}", proxy);
        }
        out
    }
}

impl Topology for ClusterTopology {
    fn name(&self) -> &'static str {
        "cluster"
    }

    fn is_cluster(&self) -> bool {
        true
    }

    fn discover_targets(&self, partition: &Partition) -> Vec<TransferTarget> {
        partition
            .nodes()
            .map(|node| TransferTarget {
                node: node.clone(),
                address: node.to_string(),
            })
            .collect()
    }

    fn transport_config(
        &self,
        targets: &[TransferTarget],
        scratch_dir: &Path,
    ) -> Result<TransportConfig> {
        let config_file = scratch_dir.join(SSH_CONFIG_FILE);
        fs::write(&config_file, self.ssh_config(targets))?;

        let mut ssh_args = vec!["-F".to_string(), config_file.to_string_lossy().into_owned()];
        ssh_args.extend(self.extra_opts.iter().cloned());
        Ok(TransportConfig {
            ssh_program: self.ssh_program.clone(),
            ssh_args,
        })
    }
}

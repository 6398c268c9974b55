//! Named collection of supervisors

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::command::CommandSpec;
use crate::config::{RegistryConfig, SupervisorConfig};
use crate::error::{Result, SupervisorError};
use crate::status::{Lifecycle, Status};
use crate::supervisor::ProcessSupervisor;

/// Terminal statuses of started processes, one per process
///
/// Closes once every process started with it has finalized.
pub type StatusStream = ReceiverStream<Status>;

#[derive(Debug, Clone)]
struct Entry {
    supervisor: ProcessSupervisor,
    spec: CommandSpec,
    deadline: Option<Duration>,
}

/// Registry of named process supervisors
///
/// The name map has its own lock; per-process state sits behind each
/// supervisor's lock, so a busy process never blocks lookups of another.
#[derive(Debug)]
pub struct SupervisorRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    config: SupervisorConfig,
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default())
    }

    pub fn with_config(config: SupervisorConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Build a registry with every process declared in `config`
    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        let mut entries = HashMap::with_capacity(config.process.len());

        for process in &config.process {
            if entries.contains_key(&process.name) {
                return Err(SupervisorError::DuplicateName {
                    name: process.name.clone(),
                });
            }
            let entry = Entry {
                supervisor: ProcessSupervisor::new(&process.name, config.supervisor.clone()),
                spec: process.command()?,
                deadline: process.deadline().or(config.supervisor.default_deadline()),
            };
            entries.insert(process.name.clone(), entry);
        }

        info!(count = entries.len(), "Loaded process table");

        Ok(Self {
            entries: RwLock::new(entries),
            config: config.supervisor,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Register a process under `name` with the configured default deadline
    pub async fn register(&self, name: impl Into<String>, spec: CommandSpec) -> Result<()> {
        let deadline = self.config.default_deadline();
        self.register_with_deadline(name, spec, deadline).await
    }

    /// Register a process under `name` with its own deadline
    pub async fn register_with_deadline(
        &self,
        name: impl Into<String>,
        spec: CommandSpec,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let name = name.into();
        let mut entries = self.entries.write().await;

        if entries.contains_key(&name) {
            return Err(SupervisorError::DuplicateName { name });
        }

        debug!(name = %name, command = %spec, "Registered process");
        entries.insert(
            name.clone(),
            Entry {
                supervisor: ProcessSupervisor::new(&name, self.config.clone()),
                spec,
                deadline,
            },
        );
        Ok(())
    }

    /// Remove a process, stopping it first if it is still running
    ///
    /// A running process is still reported on the stream it was started with.
    pub async fn remove(&self, name: &str) -> Result<Status> {
        let entry = self
            .entries
            .write()
            .await
            .remove(name)
            .ok_or_else(|| not_found(name))?;

        entry.supervisor.stop();
        debug!(name = %name, "Removed process");
        Ok(entry.supervisor.status())
    }

    /// Start one process
    ///
    /// `deadline` overrides the registered one; `None` keeps it and
    /// `Some(Duration::ZERO)` runs without any. The spawn happens before this
    /// returns, so a launch error comes back here directly.
    pub async fn start_one(&self, name: &str, deadline: Option<Duration>) -> Result<StatusStream> {
        let Entry {
            supervisor,
            spec,
            deadline: registered,
        } = self.entry(name).await?;
        let deadline = deadline.or(registered);
        supervisor.start(spec).await?;

        let (tx, rx) = mpsc::channel(self.config.status_channel_capacity.max(1));
        tokio::spawn(async move {
            let status = supervisor.run_until(deadline).await;
            let _ = tx.send(status).await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Start every registered process that has not been started yet
    ///
    /// Each spawn happens before this returns; the processes then run
    /// concurrently and independently. A launch error is delivered as that
    /// process's terminal status on the stream.
    pub async fn start_all(&self) -> StatusStream {
        let pending: Vec<Entry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.supervisor.lifecycle() == Lifecycle::NotStarted)
            .cloned()
            .collect();

        info!(count = pending.len(), "Starting processes");

        let (tx, rx) = mpsc::channel(self.config.status_channel_capacity.max(1));
        for Entry {
            supervisor,
            spec,
            deadline,
        } in pending
        {
            let started = match supervisor.start(spec).await {
                Ok(_) => true,
                Err(SupervisorError::AlreadyStarted { name }) => {
                    debug!(name = %name, "Already started, not reporting here");
                    continue;
                }
                Err(_) => false,
            };

            let tx = tx.clone();
            tokio::spawn(async move {
                let status = if started {
                    supervisor.run_until(deadline).await
                } else {
                    supervisor.status()
                };
                let _ = tx.send(status).await;
            });
        }

        ReceiverStream::new(rx)
    }

    /// Stop one process
    pub async fn stop_one(&self, name: &str) -> Result<()> {
        let entry = self.entry(name).await?;
        if !entry.supervisor.stop() {
            debug!(name = %name, "Process already stopping or done");
        }
        Ok(())
    }

    /// Stop every process; returns how many stops were initiated
    pub async fn stop_all(&self) -> usize {
        let supervisors: Vec<ProcessSupervisor> = self
            .entries
            .read()
            .await
            .values()
            .map(|entry| entry.supervisor.clone())
            .collect();

        let stopped = supervisors.iter().filter(|sup| sup.stop()).count();
        if stopped > 0 {
            info!(count = stopped, "Stopping processes");
        }
        stopped
    }

    /// Live status of one process
    pub async fn query(&self, name: &str) -> Result<Status> {
        Ok(self.entry(name).await?.supervisor.status())
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn entry(&self, name: &str) -> Result<Entry> {
        self.entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }
}

impl Default for SupervisorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(name: &str) -> SupervisorError {
    SupervisorError::NotFound {
        name: name.to_string(),
    }
}

//! # vodpub-process
//!
//! **Purpose**: Supervision of long-running external encoder processes
//!
//! Starts external pipelines (typically `ffmpeg` publishing a stream), captures
//! their output, enforces optional run deadlines and reports one consistent,
//! finalized-once status per process.
//!
//! ## Features
//!
//! - **Process Supervision**: start, stop-on-demand and deadline-driven stop
//! - **Output Capture**: stdout/stderr drained line by line into bounded buffers
//! - **Exit Classification**: our own stop is not a failure; foreign signals are
//! - **Process Groups**: a stop reaches everything the process forked (Unix)
//! - **Named Registry**: many processes, one multiplexed status stream
//! - **TOML Process Table**: declare processes and tunables in a config file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_stream::StreamExt;
//! use vodpub_process::{CommandSpec, SupervisorRegistry};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SupervisorRegistry::new();
//!
//! let spec = CommandSpec::builder("ffmpeg")
//!     .args(["-re", "-i", "input.mp4", "-f", "flv", "rtmp://localhost/live/main"])
//!     .build()?;
//! registry.register("main", spec).await?;
//!
//! let mut statuses = registry.start_one("main", Some(Duration::from_secs(5))).await?;
//! while let Some(status) = statuses.next().await {
//!     println!("{} finished after {:.1}s", status.name, status.runtime_seconds);
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod exit;
pub mod handle;
pub mod registry;
pub mod status;
pub mod supervisor;

pub use command::{CommandSpec, CommandSpecBuilder};
pub use config::{ProcessEntry, RegistryConfig, StopSignal, SupervisorConfig};
pub use error::{Failure, FailureKind, Result, SupervisorError};
pub use exit::ExitReason;
pub use handle::ProcessHandle;
pub use registry::{StatusStream, SupervisorRegistry};
pub use status::{Lifecycle, OutputBuffer, Status, StopReason};
pub use supervisor::ProcessSupervisor;

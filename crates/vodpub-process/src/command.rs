//! Launch descriptor for a supervised process

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

/// Immutable description of one subprocess to run
///
/// Built once through [`CommandSpec::builder`] and then only read by the
/// supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Start building a command for `program`
    pub fn builder(program: impl Into<String>) -> CommandSpecBuilder {
        CommandSpecBuilder {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Shorthand for a program with arguments and nothing else
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(program).args(args).build()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment variables added to the inherited environment
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builder for [`CommandSpec`]
#[derive(Debug, Clone)]
pub struct CommandSpecBuilder {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandSpecBuilder {
    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Validate and freeze the command
    pub fn build(self) -> Result<CommandSpec> {
        if self.program.trim().is_empty() {
            return Err(SupervisorError::InvalidCommand(
                "program must not be empty".to_string(),
            ));
        }

        Ok(CommandSpec {
            program: self.program,
            args: self.args,
            env: self.env,
            working_dir: self.working_dir,
        })
    }
}

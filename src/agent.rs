//! User-agent pool
//!
//! Loads a line-delimited list of user-agent strings and hands out a random
//! one per request. Lines starting with `#` or `;` are comments.

use rand::seq::SliceRandom;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to read user-agent list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no user-agent strings loaded from {0}")]
    Empty(PathBuf),
}

/// A fixed pool of user-agent strings, read once at startup.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let agents: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
            .map(str::to_string)
            .collect();

        if agents.is_empty() {
            return Err(AgentError::Empty(path.to_path_buf()));
        }

        Ok(Self { agents })
    }

    /// A random agent string; uniform over the pool.
    pub fn random(&self) -> &str {
        self.agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

//! Domain worker pool under a bounded admission gate
//!
//! The supervisor partitions the loaded frontier by registrable domain,
//! filters it through the CLI allow-list, and runs one task per admitted
//! domain. Admission is a counting semaphore sized to the machine's
//! parallelism; each task carries its owned permit for its whole life, so
//! the permit returns on normal completion, on error, and on panic alike.
//! A failed domain never takes a sibling down with it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::{AgentError, UserAgentPool};
use crate::cache::ContentCache;
use crate::config::Config;
use crate::crawl::fetcher::Fetcher;
use crate::crawl::worker::DomainWorker;
use crate::extract::HtmlExtractor;
use crate::frontier::{DomainBatch, FrontierError, FrontierStore};
use crate::trust::{self, TrustStore};
use crate::url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no URLs configured under {0}")]
    FrontierEmpty(PathBuf),
    #[error(transparent)]
    Frontier(#[from] FrontierError),
    #[error(transparent)]
    Agents(#[from] AgentError),
}

pub struct Supervisor {
    config: Config,
    allow: HashSet<String>,
}

impl Supervisor {
    /// `domains` is the raw CLI allow-list; each entry is lowercased and
    /// reduced to its registrable domain. Empty means "all configured".
    pub fn new(config: Config, domains: &[String]) -> Self {
        let allow = domains
            .iter()
            .map(|d| Url::parse(&d.to_lowercase()).registrable_domain())
            .filter(|d| !d.is_empty())
            .collect();
        Self { config, allow }
    }

    pub async fn run(&self) -> Result<(), SupervisorError> {
        let agents = Arc::new(UserAgentPool::load(&self.config.user_agent_list)?);

        let store = FrontierStore::new(&self.config.data_dir)?;
        let batches = store.load()?;
        if batches.is_empty() {
            return Err(SupervisorError::FrontierEmpty(self.config.data_dir.clone()));
        }

        let admitted = filter_batches(batches, &self.allow);
        info!(
            "crawling {} domain(s) with {} permit(s)",
            admitted.len(),
            gate_permits()
        );

        let frontier = Arc::new(store);
        let cache = Arc::new(ContentCache::new(
            &self.config.cache_dir,
            self.config.cache_age_limit(),
        ));
        let gate = Arc::new(Semaphore::new(gate_permits()));
        let base_ca = trust::system_ca_path();

        let mut running: Vec<(Url, JoinHandle<anyhow::Result<()>>)> = Vec::new();

        for (domain, seeds) in admitted {
            let Ok(permit) = gate.clone().acquire_owned().await else {
                // The gate is never closed; bail out rather than spawn
                // unadmitted work if that ever changes.
                break;
            };

            let batch = DomainBatch {
                domain: domain.clone(),
                rate_limit: self.config.rate_limit_for(&domain),
                seeds,
            };
            let agents = agents.clone();
            let cache = cache.clone();
            let frontier = frontier.clone();
            let script_dir = self.config.script_dir.clone();
            let pem_dir = self.config.pem_dir.clone();
            let base_ca = base_ca.clone();
            let task_domain = domain.clone();

            let handle = tokio::spawn(async move {
                // Owned permit: released on return, error, and panic.
                let _permit = permit;

                let Some(extractor) = HtmlExtractor::for_domain(&script_dir, &task_domain) else {
                    warn!("no extraction recipe for {task_domain}");
                    return Ok(());
                };

                info!("crawler starting: {task_domain}");
                let trust = TrustStore::new(pem_dir, base_ca);
                let fetcher = Fetcher::new(agents, trust)?;
                DomainWorker::new(batch, cache, Box::new(extractor), frontier, fetcher)
                    .run()
                    .await;
                info!("crawler finished: {task_domain}");
                Ok(())
            });

            running.push((domain, handle));
        }

        self.drain(running).await;
        Ok(())
    }

    /// Poll task completions at 250 ms resolution; a tick with no completion
    /// logs the in-flight domains.
    async fn drain(&self, mut running: Vec<(Url, JoinHandle<anyhow::Result<()>>)>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.tick().await; // first tick fires immediately

        while !running.is_empty() {
            ticker.tick().await;

            let mut progressed = false;
            let mut still_running = Vec::with_capacity(running.len());

            for (domain, handle) in running {
                if !handle.is_finished() {
                    still_running.push((domain, handle));
                    continue;
                }
                progressed = true;
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!("crawler for {domain} failed: {e:#}"),
                    Err(join_err) if join_err.is_panic() => {
                        error!("crawler for {domain} panicked")
                    }
                    Err(join_err) => error!("crawler for {domain} aborted: {join_err}"),
                }
            }

            running = still_running;
            if !progressed && !running.is_empty() {
                let names: Vec<String> = running.iter().map(|(d, _)| d.to_string()).collect();
                info!("waiting on {} domain(s): {}", running.len(), names.join(", "));
            }
        }
    }
}

/// Admission gate width: one permit per unit of available parallelism.
fn gate_permits() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// Keep only allow-listed domains; an empty allow-list admits everything.
fn filter_batches(
    batches: BTreeMap<Url, BTreeSet<Url>>,
    allow: &HashSet<String>,
) -> BTreeMap<Url, BTreeSet<Url>> {
    if allow.is_empty() {
        return batches;
    }
    batches
        .into_iter()
        .filter(|(domain, _)| allow.contains(domain.canonical()))
        .collect()
}

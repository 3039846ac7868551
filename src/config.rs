//! Group configuration: backend, size and job-distribution policy.
//!
//! Defaults can be overridden from the environment with
//! [`GroupConfig::from_env`]:
//!
//! | variable               | values                                        |
//! |------------------------|-----------------------------------------------|
//! | `SIMSNAP_BACKEND`      | `threads` (alias `multiprocessing`), `mpi`    |
//! | `SIMSNAP_RANKS`        | total ranks including the coordinator, >= 2   |
//! | `SIMSNAP_DISTRIBUTION` | `static`, `static-striped`, `on-demand`       |

use crate::task_error::TaskError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_BACKEND: &str = "SIMSNAP_BACKEND";
pub const ENV_RANKS: &str = "SIMSNAP_RANKS";
pub const ENV_DISTRIBUTION: &str = "SIMSNAP_DISTRIBUTION";

/// How ranks are realised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Every rank is a thread of this process.
    Threads,
    /// Ranks are MPI processes; the group size comes from the MPI runtime.
    Mpi,
}

/// How a static split lays jobs out over the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaticSplit {
    /// Each worker gets one consecutive run of jobs.
    Contiguous,
    /// Worker `k` of `n` gets jobs `k`, `k + n`, `k + 2n`, ...
    Striped,
}

/// Job-distribution policy, fixed for the whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    /// Every worker computes its own share; no messages.
    Static(StaticSplit),
    /// The coordinator hands out one job at a time to whoever asks.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub backend: Backend,
    /// Total number of ranks, coordinator included. Ignored by the MPI backend.
    pub ranks: usize,
    pub distribution: Distribution,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Threads,
            ranks: 2,
            distribution: Distribution::OnDemand,
        }
    }
}

impl GroupConfig {
    pub fn threads(ranks: usize, distribution: Distribution) -> Self {
        Self {
            backend: Backend::Threads,
            ranks,
            distribution,
        }
    }

    /// Defaults overlaid with whatever `SIMSNAP_*` variables are set.
    pub fn from_env() -> Result<Self, TaskError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay values looked up by variable name.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TaskError> {
        if let Some(v) = lookup(ENV_BACKEND) {
            self.backend = v.parse()?;
        }
        if let Some(v) = lookup(ENV_RANKS) {
            self.ranks = v
                .trim()
                .parse()
                .map_err(|e| TaskError::Config(format!("{ENV_RANKS}={v:?}: {e}")))?;
        }
        if let Some(v) = lookup(ENV_DISTRIBUTION) {
            self.distribution = v.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.backend == Backend::Threads && self.ranks < 2 {
            return Err(TaskError::Config(format!(
                "need at least 2 ranks (a coordinator and a worker), got {}",
                self.ranks
            )));
        }
        if self.backend == Backend::Mpi && !cfg!(feature = "mpi-support") {
            return Err(TaskError::Config(
                "the mpi backend needs the `mpi-support` feature".into(),
            ));
        }
        Ok(())
    }
}

impl FromStr for Backend {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "threads" | "multiprocessing" => Ok(Backend::Threads),
            "mpi" => Ok(Backend::Mpi),
            other => Err(TaskError::Config(format!("unknown backend `{other}`"))),
        }
    }
}

impl FromStr for Distribution {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" | "static-contiguous" => Ok(Distribution::Static(StaticSplit::Contiguous)),
            "static-striped" => Ok(Distribution::Static(StaticSplit::Striped)),
            "on-demand" | "doled" => Ok(Distribution::OnDemand),
            other => Err(TaskError::Config(format!("unknown job distribution `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parses_names() {
        assert_eq!("multiprocessing".parse::<Backend>().unwrap(), Backend::Threads);
        assert_eq!(" MPI ".parse::<Backend>().unwrap(), Backend::Mpi);
        assert_eq!(
            "static-striped".parse::<Distribution>().unwrap(),
            Distribution::Static(StaticSplit::Striped)
        );
        assert!("round-robin".parse::<Distribution>().is_err());
    }

    #[test]
    fn overlay_replaces_defaults() {
        let cfg = GroupConfig::default()
            .overlay(lookup(&[(ENV_RANKS, "5"), (ENV_DISTRIBUTION, "static")]))
            .unwrap();
        assert_eq!(cfg.ranks, 5);
        assert_eq!(cfg.distribution, Distribution::Static(StaticSplit::Contiguous));
        assert_eq!(cfg.backend, Backend::Threads);
    }

    #[test]
    fn rejects_single_rank_groups() {
        let err = GroupConfig::default()
            .overlay(lookup(&[(ENV_RANKS, "1")]))
            .unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
        assert!(GroupConfig::default().overlay(lookup(&[(ENV_RANKS, "many")])).is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = GroupConfig::threads(4, Distribution::Static(StaticSplit::Striped));
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<GroupConfig>(&json).unwrap(), cfg);
        let partial: GroupConfig = serde_json::from_str(r#"{"ranks": 3}"#).unwrap();
        assert_eq!(partial.distribution, Distribution::OnDemand);
    }
}

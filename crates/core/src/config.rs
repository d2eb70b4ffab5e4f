use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Scheduler kind ────────────────────────────────────────────

/// Which dispatch strategy a scheduler uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// One dedicated unit of work per client, run by the thread service.
    Normal,
    /// Fixed pool of workers draining a shared FIFO queue.
    Multi,
    /// One dispatcher thread draining pending requests in batches.
    Simple,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Normal => write!(f, "normal"),
            SchedulerKind::Multi => write!(f, "multi"),
            SchedulerKind::Simple => write!(f, "simple"),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(SchedulerKind::Normal),
            "multi" => Ok(SchedulerKind::Multi),
            "simple" => Ok(SchedulerKind::Simple),
            other => Err(format!("unknown scheduler kind '{}'", other)),
        }
    }
}

// ── Scheduler policy ──────────────────────────────────────────

/// Process-wide scheduler policy. Read once at startup, immutable after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerPolicy {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Collect per-trigger invocation statistics.
    pub keeping_statistics: bool,
    /// Periodically dump statistics to `<node_name>.statistics`.
    pub dumping_statistics: bool,
    /// Run the health watchdog.
    pub watching: bool,
    /// How long a trigger may run before the watchdog complains.
    #[serde(with = "millis")]
    pub warning_time: Duration,
    /// Share one pooled scheduler across every registrant in the process.
    pub static_scheduler: bool,
    /// Worker pool size for the pooled scheduler.
    pub scheduler_threads: usize,
    /// Strategy used for per-registrant schedulers.
    pub kind: SchedulerKind,
    /// Node name, used for the statistics file and shared thread names.
    pub node_name: String,
    /// Directory the statistics file is written to.
    pub statistics_dir: PathBuf,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            profile: String::new(),
            keeping_statistics: false,
            dumping_statistics: false,
            watching: true,
            warning_time: Duration::from_millis(120_000),
            static_scheduler: false,
            scheduler_threads: 4,
            kind: SchedulerKind::Normal,
            node_name: "unknown".to_string(),
            statistics_dir: PathBuf::from("."),
        }
    }
}

impl SchedulerPolicy {
    /// Build the policy from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SHAREDTHREAD_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SHAREDTHREAD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build the policy for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let mut policy = Self::from_lookup(|key| profiled_env_opt(&p, key));
        policy.profile = p;
        policy
    }

    /// Build the policy from an arbitrary key lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key).and_then(|v| parse_bool(&v)).unwrap_or(default)
        };

        let dumping_statistics = flag("SCHEDULER_DUMP_STATISTICS", defaults.dumping_statistics);
        // Dumping without collecting would write an empty file forever.
        let keeping_statistics =
            dumping_statistics || flag("SCHEDULER_STATISTICS", defaults.keeping_statistics);

        let warning_time = lookup("SCHEDULER_WARNING_TIME_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.warning_time);

        let scheduler_threads = lookup("SCHEDULER_THREADS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.scheduler_threads);

        let kind = match lookup("SCHEDULER_KIND") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "ignoring SCHEDULER_KIND, using default");
                defaults.kind
            }),
            None => defaults.kind,
        };

        Self {
            profile: String::new(),
            keeping_statistics,
            dumping_statistics,
            watching: flag("SCHEDULER_WATCHING", defaults.watching),
            warning_time,
            static_scheduler: flag("SCHEDULER_STATIC", defaults.static_scheduler),
            scheduler_threads,
            kind,
            node_name: lookup("NODE_NAME").unwrap_or(defaults.node_name),
            statistics_dir: lookup("SCHEDULER_STATISTICS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.statistics_dir),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Path of the periodic statistics dump: `<statistics_dir>/<node_name>.statistics`.
    pub fn statistics_path(&self) -> PathBuf {
        self.statistics_dir.join(format!("{}.statistics", self.node_name))
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Scheduler policy loaded (profile: {}):", self.profile_label());
        tracing::info!("  node:        {}", self.node_name);
        tracing::info!(
            "  dispatch:    static={}, kind={}, threads={}",
            self.static_scheduler,
            self.kind,
            self.scheduler_threads
        );
        tracing::info!(
            "  watchdog:    watching={}, warning_time={:?}",
            self.watching,
            self.warning_time
        );
        tracing::info!(
            "  statistics:  keeping={}, dumping={}, path={}",
            self.keeping_statistics,
            self.dumping_statistics,
            self.statistics_path().display()
        );
    }

    /// Return a JSON view of the policy.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "node_name": self.node_name,
            "dispatch": {
                "static": self.static_scheduler,
                "kind": self.kind,
                "threads": self.scheduler_threads,
            },
            "watchdog": {
                "watching": self.watching,
                "warning_time_ms": self.warning_time.as_millis() as u64,
            },
            "statistics": {
                "keeping": self.keeping_statistics,
                "dumping": self.dumping_statistics,
                "path": self.statistics_path(),
            },
        })
    }
}

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sharedthread_core::{Result, Trigger, TriggerKey};

/// Accumulated invocation figures for one trigger identity.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationStatistics {
    /// Trigger description captured on first invocation.
    pub label: String,
    /// Number of completed invocations (successful or not).
    pub count: u64,
    /// Sum of elapsed wall-clock time across invocations.
    pub total_millis: u64,
    /// When the most recent invocation finished.
    pub last_invoked: Option<DateTime<Utc>>,
}

impl InvocationStatistics {
    fn new(label: String) -> Self {
        Self {
            label,
            count: 0,
            total_millis: 0,
            last_invoked: None,
        }
    }

    fn accumulate(&mut self, elapsed_millis: u64) {
        self.count += 1;
        self.total_millis += elapsed_millis;
        self.last_invoked = Some(Utc::now());
    }

    /// Mean invocation time in seconds.
    ///
    /// The per-call mean is truncated to whole milliseconds before scaling so
    /// that reports stay comparable with existing statistics files.
    pub fn mean_seconds(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.total_millis / self.count) as f64 / 1000.0
    }

    /// One report line: `<label>\t<count>\t<mean seconds>`.
    pub fn report_line(&self) -> String {
        format!("{}\t{}\t{:?}", self.label, self.count, self.mean_seconds())
    }
}

/// A registry entry. Holding the trigger keeps its address, and so its
/// key, from being reused by a later allocation.
struct Tracked {
    _trigger: Arc<dyn Trigger>,
    stats: InvocationStatistics,
}

impl fmt::Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.stats, f)
    }
}

/// Statistics for every trigger run by workers sharing this registry.
///
/// Entries are never removed; the registry lives as long as its context and
/// keeps every trigger it has seen alive.
#[derive(Debug, Default)]
pub struct StatisticsRegistry {
    entries: Mutex<HashMap<TriggerKey, Tracked>>,
}

impl StatisticsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one invocation of `trigger` that took `elapsed_millis`.
    pub fn accumulate(&self, trigger: &Arc<dyn Trigger>, elapsed_millis: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(TriggerKey::of(trigger))
            .or_insert_with(|| Tracked {
                _trigger: Arc::clone(trigger),
                stats: InvocationStatistics::new(trigger.describe()),
            })
            .stats
            .accumulate(elapsed_millis);
    }

    /// Figures for one trigger, if it has ever been invoked.
    pub fn get(&self, trigger: &Arc<dyn Trigger>) -> Option<InvocationStatistics> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TriggerKey::of(trigger))
            .map(|tracked| tracked.stats.clone())
    }

    /// Copy of every entry, sorted by label.
    pub fn snapshot(&self) -> Vec<InvocationStatistics> {
        let mut all: Vec<_> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|tracked| tracked.stats.clone())
            .collect();
        all.sort_by(|a, b| a.label.cmp(&b.label));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one line per tracked trigger.
    pub fn report_statistics<W: Write>(&self, out: &mut W) -> Result<()> {
        for stats in self.snapshot() {
            writeln!(out, "{}", stats.report_line())?;
        }
        Ok(())
    }

    /// Replace the file at `path` with a fresh report.
    pub fn dump_to(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.report_statistics(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

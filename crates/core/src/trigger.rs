use std::fmt;
use std::sync::Arc;

/// A schedulable unit of client work: "activate me".
///
/// Schedulers key clients by trigger identity (the address of the shared
/// allocation), so the same `Arc` must be used to register, schedule and
/// unregister a client.
pub trait Trigger: Send + Sync {
    /// Run the client's work once.
    fn trigger(&self) -> anyhow::Result<()>;

    /// Human-readable identity, used in logs and the statistics report.
    fn describe(&self) -> String {
        format!(
            "{}@{:x}",
            std::any::type_name::<Self>(),
            self as *const Self as *const () as usize
        )
    }
}

/// Identity of a registered trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey(usize);

impl TriggerKey {
    pub fn of(trigger: &Arc<dyn Trigger>) -> Self {
        Self(Arc::as_ptr(trigger) as *const () as usize)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A trigger built from a name and a closure.
pub struct NamedTrigger<F> {
    name: String,
    body: F,
}

impl<F> NamedTrigger<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }

    /// Wrap straight into the shared form schedulers accept.
    pub fn shared(name: impl Into<String>, body: F) -> Arc<dyn Trigger> {
        Arc::new(Self::new(name, body))
    }
}

impl<F> Trigger for NamedTrigger<F>
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    fn trigger(&self) -> anyhow::Result<()> {
        (self.body)()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl<F> fmt::Debug for NamedTrigger<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedTrigger").field("name", &self.name).finish()
    }
}

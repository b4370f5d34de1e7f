//! Coordinator configuration.

use std::time::Duration;

use tracing::warn;

use visionaid_events::DEFAULT_BUS_ADDR;

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Address the event bus subscriber binds.
    pub bus_addr: String,
    /// Pause after terminating an agent before the next one starts.
    pub settle_interval: Duration,
    /// How often the voice loop checks whether it may listen.
    pub poll_interval: Duration,
    /// Upper bound on one listen call.
    pub listen_timeout: Duration,
    /// Default bound on a blocking agent's run.
    pub max_runtime: Duration,
    /// Capacity of the voice command queue.
    pub queue_capacity: usize,
    /// How long the command help stays visible after a switch.
    pub help_cooldown: Duration,
    /// Speak the command list before each listen.
    pub announce_commands: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_addr: DEFAULT_BUS_ADDR.to_string(),
            settle_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(500),
            listen_timeout: Duration::from_secs(5),
            max_runtime: Duration::from_secs(120),
            queue_capacity: 64,
            help_cooldown: Duration::from_secs(5),
            announce_commands: true,
        }
    }
}

impl RuntimeConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `VISIONAID_*` environment variables.
    ///
    /// Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("VISIONAID_BUS_ADDR").filter(|a| !a.trim().is_empty()) {
            config.bus_addr = addr.trim().to_string();
        }
        if let Some(ms) = parse_u64(&lookup, "VISIONAID_SETTLE_MS") {
            config.settle_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64(&lookup, "VISIONAID_LISTEN_TIMEOUT_SECS") {
            config.listen_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, "VISIONAID_MAX_RUNTIME_SECS") {
            config.max_runtime = Duration::from_secs(secs);
        }

        config
    }

    /// Sets the bus address.
    pub fn with_bus_addr(mut self, addr: impl Into<String>) -> Self {
        self.bus_addr = addr.into();
        self
    }

    /// Sets the settle interval.
    pub fn with_settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    /// Sets the voice poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the listen timeout.
    pub fn with_listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Sets the default maximum agent runtime.
    pub fn with_max_runtime(mut self, max: Duration) -> Self {
        self.max_runtime = max;
        self
    }

    /// Sets the voice queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Sets the help cooldown.
    pub fn with_help_cooldown(mut self, cooldown: Duration) -> Self {
        self.help_cooldown = cooldown;
        self
    }

    /// Enables or disables the spoken command list.
    pub fn with_announce_commands(mut self, announce: bool) -> Self {
        self.announce_commands = announce;
        self
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, value = %raw, error = %e, "ignoring malformed setting");
            None
        }
    }
}

/// Log tags identifying which subsystem produced a message
///
/// Each tag maps to one core component so per-module debug gating
/// (--debug-store, --debug-healing, ...) can be resolved from the tag.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Store,
    Ledger,
    Cache,
    RateLimit,
    Throttle,
    Probation,
    Healing,
    Config,
    System,
}

impl LogTag {
    /// Key used for --debug-<key> command-line gating
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::Store => "store",
            LogTag::Ledger => "ledger",
            LogTag::Cache => "cache",
            LogTag::RateLimit => "ratelimit",
            LogTag::Throttle => "throttle",
            LogTag::Probation => "probation",
            LogTag::Healing => "healing",
            LogTag::Config => "config",
            LogTag::System => "system",
        }
        .to_string()
    }

    /// Uncolored tag name for file output
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::Store => "STORE",
            LogTag::Ledger => "LEDGER",
            LogTag::Cache => "CACHE",
            LogTag::RateLimit => "RATELIMIT",
            LogTag::Throttle => "THROTTLE",
            LogTag::Probation => "PROBATION",
            LogTag::Healing => "HEALING",
            LogTag::Config => "CONFIG",
            LogTag::System => "SYSTEM",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

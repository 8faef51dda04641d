use thiserror::Error;

/// Wiring and configuration failures.
///
/// Every variant describes a malformed device topology detected while a
/// machine is being assembled. None of them can occur once the bus is
/// running, so callers usually abort the session on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("slot '{slot}' refers to bus '{bus}', which does not exist")]
    MissingBus { slot: String, bus: String },

    #[error("device '{0}' is not attached to any bus")]
    UnknownDevice(String),

    #[error("bus '{0}' is defined more than once")]
    DuplicateBus(String),

    #[error("tag '{tag}' is already attached to bus '{bus}'")]
    DuplicateTag { bus: String, tag: String },

    #[error("slot '{0}' has already been started")]
    AlreadyAttached(String),

    #[error("unknown card type '{0}'")]
    UnknownCard(String),

    #[error("slot '{slot}' uses address {address}, valid addresses are 0 to 30")]
    InvalidAddress { slot: String, address: u8 },

    #[error("unknown signal line '{0}'")]
    UnknownLine(String),

    #[error("expected <line>=<0|1>, got '{0}'")]
    InvalidAssignment(String),

    #[error("failed to read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

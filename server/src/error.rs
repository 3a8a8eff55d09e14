use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("unknown map: {0}")]
    UnknownMap(String),

    #[error("map already loaded: {0}")]
    MapAlreadyLoaded(String),

    #[error("player {0} is not in map {1}")]
    PlayerNotInMap(u32, String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Failures reported by the persistence collaborators
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("account already exists: {0}")]
    AccountExists(String),

    #[error("item not found: {0}")]
    ItemNotFound(u64),

    #[error("inventory full")]
    InventoryFull,

    #[error("slot ({0}, {1}) is occupied or out of range")]
    SlotUnavailable(i32, i32),

    #[error("item cannot be equipped in slot {0}")]
    InvalidSlot(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Why a UDP datagram was dropped. Never reported back to the sender.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UdpReject {
    #[error("malformed datagram")]
    Malformed,

    #[error("no session for peer")]
    UnknownSession,

    #[error("token mismatch")]
    BadToken,

    #[error("hmac mismatch")]
    BadHmac,

    #[error("sequence replayed")]
    Replay,

    #[error("rate limited")]
    RateLimited,

    #[error("non-finite direction")]
    NonFinite,
}

//! Error types for the pickup engine
//!
//! Infrastructure code (configuration, persistence, service startup) uses
//! anyhow through the `Result` alias. Queue and registry operations return
//! `PickupError` as plain values so the command layer can phrase them for
//! the user.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Expected, recoverable failures of pickup operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PickupError {
    #[error("{player} is already added to {gametype}")]
    AlreadyQueued { player: String, gametype: String },

    #[error("{player} is not added to {gametype}")]
    NotQueued { player: String, gametype: String },

    #[error("{player} is not added to any pickup")]
    NothingQueued { player: String },

    #[error("Unknown gametype: {gametype}")]
    UnknownGametype { gametype: String },

    #[error("Nobody is added to {gametype}")]
    EmptyQueue { gametype: String },

    #[error("Gametype already exists: {gametype}")]
    DuplicateGametype { gametype: String },

    #[error("Invalid gametype: {reason}")]
    InvalidGametype { reason: String },

    #[error("{gametype} needs {required} players, only {present} added")]
    NotEnoughPlayers {
        gametype: String,
        present: usize,
        required: usize,
    },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal engine error: {message}")]
    Internal { message: String },
}

impl PickupError {
    pub(crate) fn unknown_gametype(gametype: &str) -> Self {
        PickupError::UnknownGametype {
            gametype: gametype.to_string(),
        }
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        PickupError::Internal {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

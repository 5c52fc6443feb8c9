use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Index {index} out of range for {len} leaves")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Transaction rejected by network: {0}")]
    NetworkRejected(String),

    #[error("Transaction {tx_id} not confirmed after {rounds} rounds")]
    ConfirmationTimeout { tx_id: String, rounds: u32 },

    /// `tx_id` is `None` when cancellation came before the node
    /// acknowledged the transaction.
    #[error("Submission cancelled{}", for_tx(.tx_id))]
    Cancelled { tx_id: Option<String> },

    #[error("Anchor {0} not found")]
    NotFound(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected ledger state: {0}")]
    StateDecode(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnchorError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AnchorError::InvalidInput(_) | AnchorError::IndexOutOfRange { .. } => "invalid_input",
            AnchorError::NetworkRejected(_) => "network_rejected",
            AnchorError::ConfirmationTimeout { .. } => "confirmation_timeout",
            AnchorError::Cancelled { .. } => "cancelled",
            AnchorError::NotFound(_) => "not_found",
            AnchorError::Network(_) => "network",
            AnchorError::StateDecode(_) => "state_decode",
            AnchorError::Serialization(_) => "serialization",
            AnchorError::Config(_) => "config",
            AnchorError::Io(_) => "io",
        }
    }

    /// Whether the caller must fix its input rather than try again.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AnchorError::InvalidInput(_) | AnchorError::IndexOutOfRange { .. }
        )
    }
}

fn for_tx(tx_id: &Option<String>) -> String {
    tx_id
        .as_ref()
        .map(|id| format!(" while waiting for transaction {id}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, AnchorError>;

use thiserror::Error;

/// Every way the ledger can refuse work, plus the fatal conditions.
///
/// Each variant maps to a stable machine-readable reason code (see
/// [`ChainError::code`]) that the node returns to submitters verbatim.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    // Transaction rejections
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("unknown input: {0}")]
    UnknownInput(String),
    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),
    #[error("double spend: {0}")]
    DoubleSpend(String),
    #[error("amount overflow: {0}")]
    AmountOverflow(String),
    #[error("outputs exceed inputs: {0}")]
    NegativeFee(String),

    // Block rejections
    #[error("previous hash mismatch: {0}")]
    BadPrevHash(String),
    #[error("bad block index: {0}")]
    BadIndex(String),
    #[error("proof-of-work check failed: {0}")]
    BadPow(String),
    #[error("merkle root does not match block transactions")]
    BadMerkle,
    #[error("bad coinbase: {0}")]
    BadCoinbase(String),
    #[error("invalid transaction in block: {0}")]
    TxInvalid(Box<ChainError>),
    #[error("block too large: {0}")]
    TooLarge(String),
    #[error("block timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    // Mining
    #[error("stale template: {0}")]
    StaleTemplate(String),

    // Capacity
    #[error("mempool full: {0}")]
    MempoolFull(String),

    // Fatal
    #[error("ledger consistency violation: {0}")]
    Consistency(String),
    #[error("invalid configuration: {0}")]
    Config(String),

    // Codec / key material (reported to submitters as malformed)
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl ChainError {
    /// Stable reason code surfaced through the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Malformed(_)
            | ChainError::InvalidAddress(_)
            | ChainError::InvalidKey(_)
            | ChainError::InvalidAmount(_) => "malformed",
            ChainError::UnknownInput(_) => "unknown_input",
            ChainError::SignatureInvalid(_) => "signature_invalid",
            ChainError::DoubleSpend(_) => "double_spend",
            ChainError::AmountOverflow(_) => "amount_overflow",
            ChainError::NegativeFee(_) => "negative_fee",
            ChainError::BadPrevHash(_) => "bad_prev_hash",
            ChainError::BadIndex(_) => "bad_index",
            ChainError::BadPow(_) => "bad_pow",
            ChainError::BadMerkle => "bad_merkle",
            ChainError::BadCoinbase(_) => "bad_coinbase",
            ChainError::TxInvalid(_) => "tx_invalid",
            ChainError::TooLarge(_) => "too_large",
            ChainError::TimestampOutOfRange(_) => "timestamp_out_of_range",
            ChainError::StaleTemplate(_) => "stale_template",
            ChainError::MempoolFull(_) => "mempool_full",
            ChainError::Consistency(_) => "consistency",
            ChainError::Config(_) => "config",
        }
    }

    /// Capacity rejections that the submitter may simply retry later.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, ChainError::MempoolFull(_))
    }

    /// Fatal conditions: the node must stop accepting writes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::Consistency(_) | ChainError::Config(_))
    }
}

// Convenience constructors for the reason-carrying variants
impl ChainError {
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        ChainError::Malformed(reason.into())
    }

    pub fn unknown_input<S: Into<String>>(reason: S) -> Self {
        ChainError::UnknownInput(reason.into())
    }

    pub fn double_spend<S: Into<String>>(reason: S) -> Self {
        ChainError::DoubleSpend(reason.into())
    }

    pub fn bad_coinbase<S: Into<String>>(reason: S) -> Self {
        ChainError::BadCoinbase(reason.into())
    }

    pub fn consistency<S: Into<String>>(reason: S) -> Self {
        ChainError::Consistency(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

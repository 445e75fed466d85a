//! Error types for block allocator operations

use thiserror::Error;

/// Allocator operation result type
pub type Result<T> = std::result::Result<T, AllocatorError>;

/// Specific reason a block list failed validation
///
/// Produced when a persisted block list is loaded or when `validate()`
/// finds the in-memory list inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionKind {
    #[error("block at offset {offset} has size 0")]
    ZeroSize { offset: u64 },

    #[error("block at offset {offset} starts below the reserved region (ends at {reserve_end})")]
    BelowReserve { offset: u64, reserve_end: u64 },

    #[error("block at offset {offset} is not a multiple of alignment {alignment}")]
    Misaligned { offset: u64, alignment: u64 },

    #[error("blocks at offsets {previous} and {offset} are not strictly ascending")]
    Unsorted { previous: u64, offset: u64 },

    #[error("block at offset {previous} (size {previous_size}) overlaps block at offset {offset}")]
    Overlap {
        previous: u64,
        previous_size: u64,
        offset: u64,
    },

    #[error("block at offset {offset} with size {size} overflows the address space")]
    Overflow { offset: u64, size: u64 },

    #[error("bytes in use is {recorded}, but blocks and reserve add up to {computed}")]
    BytesInUseMismatch { recorded: u64, computed: u64 },
}

/// Block allocator errors
#[derive(Error, Debug)]
pub enum AllocatorError {
    /// Alignment below 512 or not a multiple of 512
    #[error("Invalid alignment: {0} (must be a non-zero multiple of 512)")]
    InvalidAlignment(u64),

    /// Block list read from disk (or held in memory) violates an invariant
    #[error("Corrupt block list: {0}")]
    Corrupt(CorruptionKind),

    /// Zero-sized blocks cannot be told apart by offset
    #[error("Cannot allocate a zero-sized block")]
    ZeroSizeBlock,

    /// No block starts at the given offset
    #[error("No block at offset {0}")]
    NoSuchBlock(u64),

    /// Report's data byte count disagrees with the allocator
    #[error("Fragmentation report mismatch: allocator holds {in_use} bytes, report claims {data_bytes} + {additional}")]
    StatisticsMismatch {
        in_use: u64,
        data_bytes: u64,
        additional: u64,
    },

    /// A placement or byte count would not fit in 64 bits
    #[error("Address space exhausted")]
    AddressSpaceExhausted,

    /// The block list could not grow
    #[error("Out of memory: cannot grow block list past {0} entries")]
    OutOfMemory(usize),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Trace line could not be parsed
    #[error("Trace parse error at line {line}: {reason}")]
    TraceParse { line: usize, reason: String },

    /// Trace refers to allocator state that replay never saw
    #[error("Replay mismatch: {0}")]
    ReplayMismatch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AllocatorError {
    /// True when the error means persisted (or in-memory) block data is bad
    pub fn is_corruption(&self) -> bool {
        matches!(self, AllocatorError::Corrupt(_))
    }

    /// True when the caller broke the allocator's usage contract
    ///
    /// The allocator state is left untouched, but the caller's own
    /// bookkeeping is wrong and should not continue.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            AllocatorError::ZeroSizeBlock
                | AllocatorError::NoSuchBlock(_)
                | AllocatorError::StatisticsMismatch { .. }
        )
    }
}

impl From<CorruptionKind> for AllocatorError {
    fn from(kind: CorruptionKind) -> Self {
        AllocatorError::Corrupt(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AllocatorError::Corrupt(CorruptionKind::ZeroSize { offset: 0 }).is_corruption());
        assert!(AllocatorError::NoSuchBlock(512).is_contract_violation());
        assert!(AllocatorError::ZeroSizeBlock.is_contract_violation());
        assert!(!AllocatorError::InvalidAlignment(100).is_contract_violation());
        assert!(!AllocatorError::InvalidAlignment(100).is_corruption());
    }

    #[test]
    fn test_display_names_offsets() {
        let err: AllocatorError = CorruptionKind::Misaligned {
            offset: 700,
            alignment: 512,
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("700"));
        assert!(msg.contains("512"));
    }
}

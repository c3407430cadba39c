use thiserror::Error;

/// Errors reported by history navigation.
///
/// A failed operation never touches the past or future stacks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("history index {index} out of range (length {len})")]
    InvalidIndex { index: usize, len: usize },
}

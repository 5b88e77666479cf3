/// Errors produced while compiling a search query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    /// A `/pattern/` token did not compile.
    #[error("invalid regex /{pattern}/: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// A regex literal carried a flag the matcher does not understand.
    #[error("unsupported regex flag {flag:?} in /{pattern}/")]
    InvalidFlag { pattern: String, flag: char },
}

use thiserror::Error;

/// Raised when the token source cannot consume its input.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("unexpected input at offset {offset}: {snippet:?}")]
pub struct LexError {
    pub offset: usize,
    pub snippet: String,
}

/// Why a single clause could not be turned into a rule.
///
/// These never abort a parse; the parser records them as diagnostics and
/// carries on with the next clause.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RuleError {
    #[error("clause has {len} tokens, too short to hold a head")]
    TooShort { len: usize },
    #[error("head has no relation name")]
    MissingRelation,
    #[error("operand `{operand}` appears before any function name")]
    OperandBeforeFunction { operand: String },
    #[error("`{punct}` closes a goal that was never started")]
    EmptyGoal { punct: String },
    #[error("clause is not terminated by `.`")]
    Unterminated,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not read rules: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("history store: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("bad data context: {0}")]
    Data(#[from] serde_json::Error),
}

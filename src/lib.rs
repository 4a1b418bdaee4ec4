pub mod ast;
pub mod engine;
pub mod error;
pub mod history;
pub mod lexer;
pub mod parser;

pub use crate::ast::{Body, Head, Operation, Operator, Rule, Token, TokenKind};
pub use crate::engine::{
    data_from_json, Arguments, ConfidenceRunner, Data, ExecutionContext, LogicEngine,
    RuleExecuted, RuleObserver, RunnerConfig,
};
pub use crate::error::{EngineError, LexError, RuleError};
pub use crate::history::{History, HistoryRefiner};
pub use crate::parser::{Diagnostic, Parsed, RuleParser, RuleSet};

//! Expression evaluation and watchpoints for an interactive debugger.
//!
//! Expressions are evaluated against live machine state reached through
//! the [`Machine`] trait: decimal and hex literals, `$`-prefixed register
//! references, a single level of memory dereference, and the usual
//! arithmetic, comparison and logical operators. A [`WatchPool`] stores
//! expressions and rechecks them after every execution step, reporting
//! the ones whose value changed.

mod expr;
mod machine;
mod watch;

pub use self::expr::lexer::{
    tokenize, LexError, Token, TokenKind, Tokens, MAX_TOKENS, MAX_TOKEN_TEXT,
};
pub use self::expr::{evaluate_expression, EvalError, ExprError};
pub use self::machine::{Machine, MemoryFault, UnknownRegister};
pub use self::watch::{
    PoolError, Trigger, TriggerSink, WatchError, WatchPool, WatchpointId, POOL_CAPACITY,
};

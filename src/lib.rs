mod compile;
mod encrypt;
mod error;
mod functions;
mod parse;
mod rewrite;
mod types;

pub use compile::{Compilation, compile};
pub use error::ScorchError;
pub use parse::{ParseError, parse_expression};
pub use types::{BinaryOp, CompileError, Expr, ExprError, ExprKind, Literal, LogicalOp, UnaryOp};

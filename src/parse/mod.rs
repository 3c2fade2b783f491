mod error;
mod grammar;

pub use error::ParseError;

use crate::types::Expr;

/// Parse a single JavaScript-subset expression into an [`Expr`].
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not a valid expression or has
/// trailing content.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    use winnow::Parser;
    grammar::complete_expression.parse(input).map_err(|e| {
        let offset = e.offset();
        ParseError::new(offset, e.into_inner().to_string())
    })
}

use std::fmt;

/// Failure to parse a single expression. Carries the byte offset into the
/// expression source where the grammar gave up, so callers that embed
/// expressions in larger documents can point at the offending spot.
#[derive(Debug)]
pub struct ParseError {
    offset: usize,
    message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }

    /// Byte offset into the expression source where parsing failed.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offset_and_message() {
        let err = ParseError::new(7, "expected expression");
        assert_eq!(
            err.to_string(),
            "parse error at offset 7: expected expression"
        );
    }

    #[test]
    fn offset_is_exposed() {
        let err = ParseError::new(3, "expected property name");
        assert_eq!(err.offset(), 3);
    }
}

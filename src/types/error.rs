use thiserror::Error;

use crate::parse::ParseError;

/// Errors raised while rewriting a single expression. Wrapped into
/// [`CompileError`] with the expression and tree-path context attached.
#[derive(Debug, Error)]
pub enum ExprError {
    /// An identifier that is neither a builtin, a local, a ref, nor a function.
    #[error("unknown reference '{name}'")]
    UnknownReference {
        /// The unresolvable identifier.
        name: String,
    },

    /// A call whose argument count differs from the function's parameter list.
    #[error("wrong number of arguments to '{name}': expected {expected}, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A bracketed `env[...]` access whose key is not a string literal.
    #[error("env lookup requires a string-literal key")]
    ComputedEnvKey,

    /// The rewrite loop hit its iteration cap without settling.
    #[error("expression rewriting did not settle after {0} passes")]
    Runaway(usize),
}

/// Errors produced while compiling a rules document.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A `functions` entry key did not match `name` or `name(params)`.
    #[error("invalid function signature '{signature}'")]
    InvalidSignature { signature: String },

    /// Two functions (user-defined or builtin) share a name.
    #[error("duplicate function definition '{name}'")]
    DuplicateFunction { name: String },

    /// A function parameter reuses a builtin identifier.
    #[error("parameter '{param}' of function '{name}' shadows a builtin")]
    ShadowedBuiltin { name: String, param: String },

    /// The function call graph contains a cycle.
    #[error("recursive function definitions: {}", path.join(" -> "))]
    RecursiveFunctions {
        /// The chain of function names forming the cycle.
        path: Vec<String>,
    },

    /// The `functions` key is not a sequence of single-entry mappings.
    #[error("'functions' must be a sequence of single-entry mappings from signature to body")]
    InvalidFunctions,

    /// A function body failed to parse.
    #[error("{source} in '{expression}' (function '{name}')")]
    FunctionSyntax {
        name: String,
        expression: String,
        #[source]
        source: ParseError,
    },

    /// A function body failed to rewrite.
    #[error("{source} in '{expression}' (function '{name}')")]
    FunctionBody {
        name: String,
        expression: String,
        #[source]
        source: ExprError,
    },

    /// A rule expression failed to parse.
    #[error("{source} in '{expression}' (at {path})")]
    ExpressionSyntax {
        expression: String,
        path: String,
        #[source]
        source: ParseError,
    },

    /// A rule expression failed to rewrite.
    #[error("{source} in '{expression}' (at {path})")]
    Expression {
        expression: String,
        path: String,
        #[source]
        source: ExprError,
    },

    /// The document is not a mapping.
    #[error("document must be a mapping")]
    InvalidDocument,

    /// The document has no `root` entry.
    #[error("missing top-level 'root' node")]
    MissingRoot,

    /// A rule node is neither a string nor a mapping.
    #[error("expected a string or mapping (at {path})")]
    InvalidNode { path: String },

    /// A control entry holds a value of the wrong type.
    #[error("'{key}' must be {expected} (at {path})")]
    InvalidValueType {
        key: String,
        expected: &'static str,
        path: String,
    },

    /// A dot-prefixed key that is not one of the control keys.
    #[error("unknown control key '{key}' (at {path})")]
    UnknownControlKey { key: String, path: String },

    /// More than one wildcard child under a single node.
    #[error("multiple wildcard children '{first}' and '{second}' (at {path})")]
    MultipleWildcards {
        first: String,
        second: String,
        path: String,
    },

    /// A wildcard reuses a ref name or builtin already in scope.
    #[error("wildcard '{name}' collides with a name already in scope (at {path})")]
    WildcardCollision { name: String, path: String },

    #[error("'required' is not allowed on wildcard key '{key}' (at {path})")]
    RequiredOnWildcard { key: String, path: String },

    #[error("duplicated keyword '{keyword}' on '{key}' (at {path})")]
    DuplicatedKeyword {
        keyword: String,
        key: String,
        path: String,
    },

    #[error("'.read/write' conflicts with '.read' or '.write' (at {path})")]
    ReadWriteConflict { path: String },

    #[error("'/few' is only valid on wildcard keys, found on '{key}' (at {path})")]
    FewOnLiteral { key: String, path: String },

    /// A `.ref` name that is a wildcard, a builtin, or already bound.
    #[error("invalid ref name '{name}' (at {path}): {reason}")]
    InvalidRef {
        name: String,
        reason: &'static str,
        path: String,
    },

    /// Deep-index metadata reached the top of the tree unconsumed.
    #[error("deep index on {} must be nested under a wildcard", keys.join(", "))]
    DanglingDeepIndex { keys: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_functions_message() {
        let err = CompileError::RecursiveFunctions {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "recursive function definitions: a -> b -> a");
    }

    #[test]
    fn duplicate_function_message() {
        let err = CompileError::DuplicateFunction {
            name: "string".into(),
        };
        assert_eq!(err.to_string(), "duplicate function definition 'string'");
    }

    #[test]
    fn shadowed_builtin_message() {
        let err = CompileError::ShadowedBuiltin {
            name: "check".into(),
            param: "auth".into(),
        };
        assert_eq!(
            err.to_string(),
            "parameter 'auth' of function 'check' shadows a builtin"
        );
    }

    #[test]
    fn expression_message_carries_context() {
        let err = CompileError::Expression {
            expression: "bogus == 1".into(),
            path: "root/users".into(),
            source: ExprError::UnknownReference {
                name: "bogus".into(),
            },
        };
        assert_eq!(
            err.to_string(),
            "unknown reference 'bogus' in 'bogus == 1' (at root/users)"
        );
    }

    #[test]
    fn argument_count_message() {
        let err = ExprError::ArgumentCount {
            name: "between".into(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "wrong number of arguments to 'between': expected 2, got 3"
        );
    }

    #[test]
    fn dangling_deep_index_message() {
        let err = CompileError::DanglingDeepIndex {
            keys: vec!["a/b".into()],
        };
        assert_eq!(
            err.to_string(),
            "deep index on a/b must be nested under a wildcard"
        );
    }
}

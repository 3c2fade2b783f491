use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::parse;
use crate::rewrite::{Rewriter, SnapshotBase};
use crate::types::{CompileError, Expr, ExprKind};

/// Identifiers interpreted specially by the rewriter. Function parameters
/// may not shadow any of these.
pub(crate) const BUILTIN_IDENTIFIERS: &[&str] = &[
    "auth", "now", "root", "next", "newData", "prev", "data", "env", "query",
];

/// Value-type predicates appended to every function table.
const VALUE_TYPE_BUILTINS: &[(&str, &str)] = &[
    ("boolean", "next.isBoolean()"),
    ("string", "next.isString()"),
    ("number", "next.isNumber()"),
    ("any", "true"),
];

static SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*(?:\((.*?)\))?\s*$").unwrap());

/// A user-defined or builtin function: name, parameter list, parsed body.
#[derive(Debug, Clone)]
pub(crate) struct FunctionDef {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) body: Expr,
}

/// All functions known to one compilation, bodies fully resolved so that
/// every call site can be inlined in a single traversal.
#[derive(Debug, Default)]
pub(crate) struct FunctionTable {
    functions: HashMap<String, FunctionDef>,
}

impl FunctionTable {
    /// Build the table from the document's `functions` sequence (if any),
    /// append the value-type builtins, then resolve every body to a fixed
    /// point in dependency order.
    pub(crate) fn build(entries: Option<&Value>) -> Result<Self, CompileError> {
        let mut defs: Vec<(String, Vec<String>, String)> = Vec::new();
        if let Some(value) = entries {
            let list = value.as_array().ok_or(CompileError::InvalidFunctions)?;
            for entry in list {
                let map = entry
                    .as_object()
                    .filter(|m| m.len() == 1)
                    .ok_or(CompileError::InvalidFunctions)?;
                let Some((signature, body)) = map.iter().next() else {
                    return Err(CompileError::InvalidFunctions);
                };
                let body = body.as_str().ok_or(CompileError::InvalidFunctions)?;
                let (name, params) = parse_signature(signature)?;
                defs.push((name, params, body.to_owned()));
            }
        }
        for (name, body) in VALUE_TYPE_BUILTINS {
            defs.push(((*name).to_owned(), Vec::new(), (*body).to_owned()));
        }

        let mut table = FunctionTable::default();
        for (name, params, body) in defs {
            for param in &params {
                if BUILTIN_IDENTIFIERS.contains(&param.as_str()) {
                    return Err(CompileError::ShadowedBuiltin {
                        name,
                        param: param.clone(),
                    });
                }
            }
            let body_ast =
                parse::parse_expression(&body).map_err(|e| CompileError::FunctionSyntax {
                    name: name.clone(),
                    expression: body.clone(),
                    source: e,
                })?;
            let def = FunctionDef {
                name: name.clone(),
                params,
                body: body_ast,
            };
            if table.functions.insert(name.clone(), def).is_some() {
                return Err(CompileError::DuplicateFunction { name });
            }
        }
        table.resolve()?;
        Ok(table)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    /// Rewrite every body until quiescent, in topological order, so function
    /// references resolve bottom-up. Cycles are reported before any body is
    /// rewritten.
    fn resolve(&mut self) -> Result<(), CompileError> {
        let order = self.topological_order()?;
        let no_refs = HashMap::new();
        for name in order {
            let Some(def) = self.functions.get(&name) else {
                continue;
            };
            let FunctionDef { name, params, body } = def.clone();
            let shown = body.to_source();
            let body = Rewriter::new(self, &params, &no_refs, SnapshotBase::NewData, 0)
                .rewrite(body)
                .map_err(|e| CompileError::FunctionBody {
                    name: name.clone(),
                    expression: shown,
                    source: e,
                })?;
            self.functions
                .insert(name.clone(), FunctionDef { name, params, body });
        }
        Ok(())
    }

    /// Kahn's algorithm over the function call graph. Leftover functions
    /// after the ready queue drains sit on or behind a reference cycle.
    fn topological_order(&self) -> Result<Vec<String>, CompileError> {
        // needed_by[X] = functions whose bodies reference X
        let mut needed_by: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut pending_refs: HashMap<&str, usize> = HashMap::new();

        for (name, def) in &self.functions {
            let refs = self.references_in(&def.body);
            pending_refs.insert(name.as_str(), refs.len());
            for reference in refs {
                if let Some((key, _)) = self.functions.get_key_value(reference.as_str()) {
                    needed_by.entry(key.as_str()).or_default().push(name.as_str());
                }
            }
        }

        let mut ready: VecDeque<&str> = pending_refs
            .iter()
            .filter(|(_, pending)| **pending == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::new();

        while let Some(name) = ready.pop_front() {
            order.push(name.to_owned());
            for &dependent in needed_by.get(name).into_iter().flatten() {
                let pending = pending_refs
                    .get_mut(dependent)
                    .expect("every function was seeded above");
                *pending -= 1;
                if *pending == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() != self.functions.len() {
            let stuck: Vec<&str> = pending_refs
                .iter()
                .filter(|(_, pending)| **pending > 0)
                .map(|(name, _)| *name)
                .collect();
            return Err(CompileError::RecursiveFunctions {
                path: self.trace_cycle(&stuck),
            });
        }

        Ok(order)
    }

    /// Names of functions referenced by a body, deduplicated. Dotted member
    /// property names are not references.
    fn references_in(&self, body: &Expr) -> Vec<String> {
        let mut refs = Vec::new();
        self.collect_references(body, &mut refs);
        refs
    }

    fn collect_references(&self, expr: &Expr, out: &mut Vec<String>) {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                if self.functions.contains_key(name) && !out.iter().any(|r| r == name) {
                    out.push(name.clone());
                }
            }
            ExprKind::Member {
                object,
                property,
                computed,
            } => {
                self.collect_references(object, out);
                if *computed {
                    self.collect_references(property, out);
                }
            }
            ExprKind::Call { callee, args } => {
                self.collect_references(callee, out);
                for arg in args {
                    self.collect_references(arg, out);
                }
            }
            ExprKind::Unary { operand, .. } => self.collect_references(operand, out),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.collect_references(left, out);
                self.collect_references(right, out);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.collect_references(test, out);
                self.collect_references(consequent, out);
                self.collect_references(alternate, out);
            }
            ExprKind::Sequence(items) | ExprKind::Array(items) => {
                for item in items {
                    self.collect_references(item, out);
                }
            }
            ExprKind::Literal(_) => {}
        }
    }

    /// Recover a concrete cycle for the error message. Every stuck function
    /// still waits on at least one other stuck function, so following any
    /// stuck reference from a stuck start must revisit a name; the trail from
    /// that name onward is the cycle.
    fn trace_cycle(&self, stuck: &[&str]) -> Vec<String> {
        let Some(mut current) = stuck.first().map(|name| (*name).to_owned()) else {
            return Vec::new();
        };
        let mut trail: Vec<String> = Vec::new();
        loop {
            if let Some(seen_at) = trail.iter().position(|name| *name == current) {
                let mut cycle = trail.split_off(seen_at);
                cycle.push(current);
                return cycle;
            }
            let next = self
                .functions
                .get(&current)
                .map(|def| self.references_in(&def.body))
                .unwrap_or_default()
                .into_iter()
                .find(|reference| stuck.contains(&reference.as_str()));
            trail.push(current);
            match next {
                Some(name) => current = name,
                None => return trail,
            }
        }
    }
}

fn parse_signature(signature: &str) -> Result<(String, Vec<String>), CompileError> {
    let caps = SIGNATURE_RE
        .captures(signature)
        .ok_or_else(|| CompileError::InvalidSignature {
            signature: signature.to_owned(),
        })?;
    let name = caps[1].to_owned();
    let params = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Ok((name, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_plain_name() {
        assert_eq!(parse_signature("percentage").unwrap(), ("percentage".into(), vec![]));
    }

    #[test]
    fn signature_with_params() {
        let (name, params) = parse_signature(" between(lo, hi) ").unwrap();
        assert_eq!(name, "between");
        assert_eq!(params, vec!["lo".to_owned(), "hi".to_owned()]);
    }

    #[test]
    fn signature_empty_parens() {
        let (name, params) = parse_signature("f()").unwrap();
        assert_eq!(name, "f");
        assert!(params.is_empty());
    }

    #[test]
    fn signature_rejects_garbage() {
        assert!(matches!(
            parse_signature("f()x"),
            Err(CompileError::InvalidSignature { .. })
        ));
        assert!(matches!(
            parse_signature("bad name(x)"),
            Err(CompileError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn builtins_are_resolved() {
        let table = FunctionTable::build(None).unwrap();
        assert_eq!(
            table.get("string").unwrap().body.to_source(),
            "newData.isString()"
        );
        assert_eq!(
            table.get("number").unwrap().body.to_source(),
            "newData.isNumber()"
        );
        assert_eq!(
            table.get("boolean").unwrap().body.to_source(),
            "newData.isBoolean()"
        );
        assert_eq!(table.get("any").unwrap().body.to_source(), "true");
    }

    #[test]
    fn user_function_body_is_resolved() {
        let table = FunctionTable::build(Some(&json!([
            {"percentage": "number && next >= 0 && next <= 100"}
        ])))
        .unwrap();
        assert_eq!(
            table.get("percentage").unwrap().body.to_source(),
            "newData.isNumber() && newData.val() >= 0 && newData.val() <= 100"
        );
    }

    #[test]
    fn parameters_survive_resolution() {
        let table = FunctionTable::build(Some(&json!([
            {"between(lo, hi)": "next >= lo && next <= hi"}
        ])))
        .unwrap();
        let def = table.get("between").unwrap();
        assert_eq!(def.params, vec!["lo".to_owned(), "hi".to_owned()]);
        assert_eq!(
            def.body.to_source(),
            "newData.val() >= lo && newData.val() <= hi"
        );
    }

    #[test]
    fn function_referencing_function_inlines() {
        let table = FunctionTable::build(Some(&json!([
            {"small": "number && next < 10"},
            {"tiny": "small && next < 2"}
        ])))
        .unwrap();
        assert_eq!(
            table.get("tiny").unwrap().body.to_source(),
            "newData.isNumber() && newData.val() < 10 && newData.val() < 2"
        );
    }

    #[test]
    fn duplicate_function_rejected() {
        let result = FunctionTable::build(Some(&json!([
            {"twice": "true"},
            {"twice": "false"}
        ])));
        assert!(matches!(
            result,
            Err(CompileError::DuplicateFunction { name }) if name == "twice"
        ));
    }

    #[test]
    fn redefining_builtin_is_duplicate() {
        let result = FunctionTable::build(Some(&json!([{"string": "true"}])));
        assert!(matches!(
            result,
            Err(CompileError::DuplicateFunction { name }) if name == "string"
        ));
    }

    #[test]
    fn shadowed_builtin_param_rejected() {
        let result = FunctionTable::build(Some(&json!([{"f(auth)": "auth == 1"}])));
        assert!(matches!(
            result,
            Err(CompileError::ShadowedBuiltin { param, .. }) if param == "auth"
        ));
    }

    #[test]
    fn mutual_recursion_detected() {
        let result = FunctionTable::build(Some(&json!([
            {"a": "b"},
            {"b": "a"}
        ])));
        match result {
            Err(CompileError::RecursiveFunctions { path }) => {
                assert!(path.len() >= 2);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected RecursiveFunctions, got {other:?}"),
        }
    }

    #[test]
    fn self_recursion_detected() {
        let result = FunctionTable::build(Some(&json!([{"loop": "loop && true"}])));
        assert!(matches!(
            result,
            Err(CompileError::RecursiveFunctions { .. })
        ));
    }

    #[test]
    fn invalid_functions_shape_rejected() {
        assert!(matches!(
            FunctionTable::build(Some(&json!({"not": "a sequence"}))),
            Err(CompileError::InvalidFunctions)
        ));
        assert!(matches!(
            FunctionTable::build(Some(&json!([{"a": "true", "b": "true"}]))),
            Err(CompileError::InvalidFunctions)
        ));
        assert!(matches!(
            FunctionTable::build(Some(&json!([{"a": 7}]))),
            Err(CompileError::InvalidFunctions)
        ));
    }

    #[test]
    fn unknown_reference_in_body_fails() {
        let result = FunctionTable::build(Some(&json!([{"f": "nonsense == 1"}])));
        assert!(matches!(result, Err(CompileError::FunctionBody { .. })));
    }
}

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::encrypt;
use crate::error::ScorchError;
use crate::functions::{BUILTIN_IDENTIFIERS, FunctionTable};
use crate::parse;
use crate::rewrite::{Rewriter, SnapshotBase};
use crate::types::{CompileError, Expr, LogicalOp};

// ---------------------------------------------------------------------------
// Keyword and key-suffix lexing
// ---------------------------------------------------------------------------

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(required|indexed|encrypted(?:\[([^\]]*)\])?)(?:\s+|$)").unwrap()
});
static ENCRYPTED_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)/encrypted(?:\[([^\]]*)\])?$").unwrap());
static FEW_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)/few$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Keyword {
    Required,
    Indexed,
    Encrypted(String),
}

impl Keyword {
    fn token(&self) -> &'static str {
        match self {
            Keyword::Required => "required",
            Keyword::Indexed => "indexed",
            Keyword::Encrypted(_) => "encrypted",
        }
    }
}

/// Split a `.value` string into its leading keyword annotations and the
/// remaining expression body.
fn leading_keywords(text: &str) -> (Vec<Keyword>, &str) {
    let mut rest = text.trim_start();
    let mut keywords = Vec::new();
    while let Some(caps) = KEYWORD_RE.captures(rest) {
        let token = &caps[1];
        let keyword = if token == "required" {
            Keyword::Required
        } else if token == "indexed" {
            Keyword::Indexed
        } else {
            Keyword::Encrypted(encrypt_pattern(caps.get(2).map(|m| m.as_str())))
        };
        keywords.push(keyword);
        let end = caps.get(0).map_or(0, |m| m.end());
        rest = &rest[end..];
    }
    (keywords, rest.trim())
}

/// Annotations carried by a raw child key, stripped off the key itself.
#[derive(Debug, PartialEq, Eq)]
struct KeyAnnotations {
    key: String,
    encrypt_key: Option<String>,
    few: bool,
}

fn strip_key_suffixes(raw: &str) -> KeyAnnotations {
    let mut key = raw.to_owned();
    let mut encrypt_key = None;
    let mut few = false;
    loop {
        if let Some(caps) = FEW_SUFFIX_RE.captures(&key) {
            few = true;
            key = caps[1].to_owned();
            continue;
        }
        if let Some(caps) = ENCRYPTED_SUFFIX_RE.captures(&key) {
            encrypt_key = Some(encrypt_pattern(caps.get(2).map(|m| m.as_str())));
            key = caps[1].to_owned();
            continue;
        }
        break;
    }
    KeyAnnotations {
        key,
        encrypt_key,
        few,
    }
}

/// An omitted or empty pattern means the whole value: `#`.
fn encrypt_pattern(pattern: Option<&str>) -> String {
    match pattern {
        Some(p) if !p.is_empty() => p.to_owned(),
        _ => "#".to_owned(),
    }
}

/// The keyword-bearing string of a child node: the node itself when it is a
/// string, or its `.value` entry when it is a mapping.
fn node_value_text(node: &Value) -> Option<&str> {
    match node {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get(".value").and_then(Value::as_str),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tree transformer
// ---------------------------------------------------------------------------

struct TreeCompiler<'a> {
    functions: &'a FunctionTable,
    locals: Vec<String>,
    refs: HashMap<String, usize>,
}

impl TreeCompiler<'_> {
    fn transform_branch(
        &mut self,
        node: &Value,
        path: &str,
        level: usize,
    ) -> Result<Map<String, Value>, CompileError> {
        let shorthand;
        let map = match node {
            Value::String(value) => {
                shorthand = Map::from_iter([(".value".to_owned(), Value::String(value.clone()))]);
                &shorthand
            }
            Value::Object(map) => map,
            _ => {
                return Err(CompileError::InvalidNode {
                    path: path.to_owned(),
                });
            }
        };

        // .ref binds before anything in the subtree (own expressions included)
        let bound_ref = match map.get(".ref") {
            Some(value) => {
                let name = expect_str(value, ".ref", path)?;
                self.bind_ref(name, path, level)?;
                Some(name.to_owned())
            }
            None => None,
        };

        let mut value_source = None;
        let mut read_source = None;
        let mut write_source = None;
        let mut more = false;
        let mut children: Vec<(&String, &Value)> = Vec::new();

        if let Some(value) = map.get(".read/write") {
            if map.contains_key(".read") || map.contains_key(".write") {
                return Err(CompileError::ReadWriteConflict {
                    path: path.to_owned(),
                });
            }
            let source = expect_str(value, ".read/write", path)?;
            read_source = Some(source);
            write_source = Some(source);
        }

        for (key, value) in map {
            match key.as_str() {
                ".value" => value_source = Some(expect_str(value, ".value", path)?),
                ".read" => read_source = Some(expect_str(value, ".read", path)?),
                ".write" => write_source = Some(expect_str(value, ".write", path)?),
                ".more" => {
                    more = value.as_bool().ok_or_else(|| CompileError::InvalidValueType {
                        key: ".more".to_owned(),
                        expected: "a boolean",
                        path: path.to_owned(),
                    })?;
                }
                ".read/write" | ".ref" => {}
                _ => children.push((key, value)),
            }
        }

        let mut required_children: Vec<String> = Vec::new();
        let mut index_on: Vec<String> = Vec::new();
        let mut deep_index: Vec<String> = Vec::new();
        let mut out_children: Vec<(String, Map<String, Value>)> = Vec::new();
        let mut wildcard: Option<String> = None;

        for (raw_key, child_value) in children {
            let annotations = strip_key_suffixes(raw_key);
            let key = annotations.key;
            if key.starts_with('.') {
                return Err(CompileError::UnknownControlKey {
                    key,
                    path: path.to_owned(),
                });
            }
            let is_wildcard = key.starts_with('$');
            if annotations.few && !is_wildcard {
                return Err(CompileError::FewOnLiteral {
                    key,
                    path: path.to_owned(),
                });
            }
            if is_wildcard {
                if let Some(first) = &wildcard {
                    return Err(CompileError::MultipleWildcards {
                        first: first.clone(),
                        second: key,
                        path: path.to_owned(),
                    });
                }
                if BUILTIN_IDENTIFIERS.contains(&key.as_str()) || self.refs.contains_key(&key) {
                    return Err(CompileError::WildcardCollision {
                        name: key,
                        path: path.to_owned(),
                    });
                }
                wildcard = Some(key.clone());
            }

            let mut encrypt_value = None;
            if let Some(text) = node_value_text(child_value) {
                let (keywords, _) = leading_keywords(text);
                let mut seen: Vec<&str> = Vec::new();
                for keyword in &keywords {
                    if seen.contains(&keyword.token()) {
                        return Err(CompileError::DuplicatedKeyword {
                            keyword: keyword.token().to_owned(),
                            key,
                            path: path.to_owned(),
                        });
                    }
                    seen.push(keyword.token());
                }
                for keyword in keywords {
                    match keyword {
                        Keyword::Required => {
                            if is_wildcard {
                                return Err(CompileError::RequiredOnWildcard {
                                    key,
                                    path: path.to_owned(),
                                });
                            }
                            required_children.push(key.clone());
                        }
                        Keyword::Indexed => {
                            if is_wildcard {
                                index_on.push(".value".to_owned());
                            } else {
                                deep_index.push(key.clone());
                            }
                        }
                        Keyword::Encrypted(pattern) => encrypt_value = Some(pattern),
                    }
                }
            }

            let child_path = format!("{path}/{key}");
            if is_wildcard {
                self.locals.push(key.clone());
            }
            let child_result = self.transform_branch(child_value, &child_path, level + 1);
            if is_wildcard {
                self.locals.pop();
            }
            let mut child_json = child_result?;

            if annotations.encrypt_key.is_some() || encrypt_value.is_some() || annotations.few {
                let mut descriptor = Map::new();
                if let Some(pattern) = annotations.encrypt_key {
                    descriptor.insert("key".to_owned(), Value::String(pattern));
                }
                if let Some(pattern) = encrypt_value {
                    descriptor.insert("value".to_owned(), Value::String(pattern));
                }
                if annotations.few {
                    descriptor.insert("few".to_owned(), Value::Bool(true));
                }
                child_json.insert(".encrypt".to_owned(), Value::Object(descriptor));
            }

            // Deep-index metadata bubbles up to the nearest wildcard ancestor.
            if let Some(Value::Array(entries)) = child_json.remove(".indexChildrenOn") {
                for entry in entries {
                    if let Value::String(index_path) = entry {
                        if is_wildcard {
                            index_on.push(index_path);
                        } else {
                            deep_index.push(format!("{key}/{index_path}"));
                        }
                    }
                }
            }

            out_children.push((key, child_json));
        }

        // Own expressions, compiled after .ref and wildcard bookkeeping.
        let mut more_allowed = more;
        let mut validate = None;
        if let Some(text) = value_source {
            let (_, body) = leading_keywords(text);
            if body == "any" {
                more_allowed = true;
            } else if !body.is_empty() {
                validate = Some(self.compile_expression(body, SnapshotBase::NewData, level, path)?);
            }
        }
        let read = read_source
            .map(|s| self.compile_expression(s, SnapshotBase::Data, level, path))
            .transpose()?;
        let write = write_source
            .map(|s| self.compile_expression(s, SnapshotBase::NewData, level, path))
            .transpose()?;

        if !required_children.is_empty() {
            let call = has_children_call(&required_children);
            validate = Some(match validate {
                Some(value) => Expr::logical(LogicalOp::And, value, call),
                None => call,
            });
        }

        let mut out = Map::new();
        if let Some(expr) = read {
            out.insert(".read".to_owned(), Value::String(expr.to_source()));
        }
        if let Some(expr) = write {
            out.insert(".write".to_owned(), Value::String(expr.to_source()));
        }
        if let Some(expr) = validate {
            out.insert(".validate".to_owned(), Value::String(expr.to_source()));
        }
        if !index_on.is_empty() {
            out.insert(
                ".indexOn".to_owned(),
                Value::Array(index_on.into_iter().map(Value::String).collect()),
            );
        }
        for (key, child) in out_children {
            out.insert(key, Value::Object(child));
        }
        if !deep_index.is_empty() {
            out.insert(
                ".indexChildrenOn".to_owned(),
                Value::Array(deep_index.into_iter().map(Value::String).collect()),
            );
        }
        // Closed world: nodes without a wildcard child or `.more` reject
        // everything else.
        if !more_allowed && wildcard.is_none() {
            out.insert("$other".to_owned(), json!({".validate": false}));
        }

        if let Some(name) = bound_ref {
            self.refs.remove(&name);
        }
        Ok(out)
    }

    fn bind_ref(&mut self, name: &str, path: &str, level: usize) -> Result<(), CompileError> {
        let reason = if name.starts_with('$') {
            Some("wildcard names cannot be refs")
        } else if BUILTIN_IDENTIFIERS.contains(&name) {
            Some("shadows a builtin")
        } else if self.locals.iter().any(|local| local == name) || self.refs.contains_key(name) {
            Some("already in scope")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(CompileError::InvalidRef {
                name: name.to_owned(),
                reason,
                path: path.to_owned(),
            });
        }
        self.refs.insert(name.to_owned(), level);
        Ok(())
    }

    fn compile_expression(
        &self,
        source: &str,
        base: SnapshotBase,
        level: usize,
        path: &str,
    ) -> Result<Expr, CompileError> {
        let ast = parse::parse_expression(source).map_err(|e| CompileError::ExpressionSyntax {
            expression: source.to_owned(),
            path: path.to_owned(),
            source: e,
        })?;
        Rewriter::new(self.functions, &self.locals, &self.refs, base, level)
            .rewrite(ast)
            .map_err(|e| CompileError::Expression {
                expression: source.to_owned(),
                path: path.to_owned(),
                source: e,
            })
    }
}

fn expect_str<'v>(value: &'v Value, key: &str, path: &str) -> Result<&'v str, CompileError> {
    value.as_str().ok_or_else(|| CompileError::InvalidValueType {
        key: key.to_owned(),
        expected: "a string",
        path: path.to_owned(),
    })
}

/// `newData.hasChildren(['a', 'b'])` over the required child keys.
fn has_children_call(keys: &[String]) -> Expr {
    let items = keys.iter().map(|key| Expr::string(key.as_str())).collect();
    Expr::call(
        Expr::member(Expr::identifier("newData"), "hasChildren"),
        vec![Expr::array(items)],
    )
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// The two artifacts of a compilation: the rules tree, and the firecrypt
/// tree when any encryption annotation was present.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub rules: Value,
    pub firecrypt: Option<Value>,
}

impl Compilation {
    /// Decode a YAML document and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`ScorchError`] on YAML, document-shape, or compilation
    /// failure.
    pub fn from_yaml(text: &str) -> Result<Self, ScorchError> {
        let decoded: serde_yaml::Value = serde_yaml::from_str(text)?;
        let document = document_from_yaml(decoded)?;
        Ok(compile(&document)?)
    }

    /// Read a YAML file and compile it.
    ///
    /// # Errors
    ///
    /// Returns [`ScorchError`] on I/O, YAML, or compilation failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScorchError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

/// Compile a decoded document into its rules and firecrypt trees.
///
/// # Errors
///
/// Returns [`CompileError`] on any structural or expression failure. No
/// partial outputs are produced.
pub fn compile(document: &Value) -> Result<Compilation, CompileError> {
    let doc = document.as_object().ok_or(CompileError::InvalidDocument)?;
    let functions = FunctionTable::build(doc.get("functions"))?;
    let root = doc.get("root").ok_or(CompileError::MissingRoot)?;

    let mut compiler = TreeCompiler {
        functions: &functions,
        locals: Vec::new(),
        refs: HashMap::new(),
    };
    let mut rules = compiler.transform_branch(root, "root", 0)?;

    if let Some(Value::Array(entries)) = rules.remove(".indexChildrenOn") {
        let keys = entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect();
        return Err(CompileError::DanglingDeepIndex { keys });
    }

    let firecrypt = encrypt::extract(&mut rules).map(Value::Object);
    Ok(Compilation {
        rules: Value::Object(rules),
        firecrypt,
    })
}

/// Convert a decoded YAML value into the JSON document the compiler
/// consumes, stringifying scalar mapping keys and unwrapping tags.
fn document_from_yaml(value: serde_yaml::Value) -> Result<Value, ScorchError> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!(i)
            } else if let Some(u) = n.as_u64() {
                json!(u)
            } else {
                json!(n.as_f64())
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(document_from_yaml)
                .collect::<Result<_, _>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => {
                        return Err(ScorchError::Document(format!(
                            "unsupported mapping key: {other:?}"
                        )));
                    }
                };
                out.insert(key, document_from_yaml(value)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => document_from_yaml(tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_doc(document: Value) -> Compilation {
        compile(&document).unwrap()
    }

    // -- Keyword lexing --

    #[test]
    fn keywords_strip_in_any_combination() {
        let (keywords, rest) = leading_keywords("required indexed string");
        assert_eq!(keywords, vec![Keyword::Required, Keyword::Indexed]);
        assert_eq!(rest, "string");
    }

    #[test]
    fn keywords_capture_encryption_pattern() {
        let (keywords, rest) = leading_keywords("encrypted[#-#-.] string");
        assert_eq!(keywords, vec![Keyword::Encrypted("#-#-.".to_owned())]);
        assert_eq!(rest, "string");
    }

    #[test]
    fn bare_encrypted_defaults_to_hash() {
        let (keywords, rest) = leading_keywords("encrypted");
        assert_eq!(keywords, vec![Keyword::Encrypted("#".to_owned())]);
        assert_eq!(rest, "");
    }

    #[test]
    fn keyword_prefix_of_identifier_is_not_stripped() {
        let (keywords, rest) = leading_keywords("requiredLevel == 1");
        assert!(keywords.is_empty());
        assert_eq!(rest, "requiredLevel == 1");
    }

    #[test]
    fn key_suffixes_stack_in_either_order() {
        assert_eq!(
            strip_key_suffixes("$file/encrypted[#-.]/few"),
            KeyAnnotations {
                key: "$file".to_owned(),
                encrypt_key: Some("#-.".to_owned()),
                few: true,
            }
        );
        assert_eq!(
            strip_key_suffixes("$file/few/encrypted"),
            KeyAnnotations {
                key: "$file".to_owned(),
                encrypt_key: Some("#".to_owned()),
                few: true,
            }
        );
    }

    #[test]
    fn plain_key_is_untouched() {
        assert_eq!(
            strip_key_suffixes("profile"),
            KeyAnnotations {
                key: "profile".to_owned(),
                encrypt_key: None,
                few: false,
            }
        );
    }

    // -- Tree behavior --

    #[test]
    fn leaf_nodes_are_closed() {
        let out = compile_doc(json!({"root": {"foo": "string"}}));
        assert_eq!(
            out.rules,
            json!({
                "foo": {".validate": "newData.isString()", "$other": {".validate": false}},
                "$other": {".validate": false}
            })
        );
    }

    #[test]
    fn more_keeps_node_open() {
        let out = compile_doc(json!({"root": {".more": true, "foo": "string"}}));
        let rules = out.rules.as_object().unwrap();
        assert!(!rules.contains_key("$other"));
        assert!(rules["foo"].as_object().unwrap().contains_key("$other"));
    }

    #[test]
    fn any_value_keeps_node_open() {
        let out = compile_doc(json!({"root": {"blob": "any"}}));
        assert_eq!(out.rules["blob"], json!({}));
    }

    #[test]
    fn wildcard_keeps_node_open_and_binds_local() {
        let out = compile_doc(json!({"root": {"$uid": "auth.uid == $uid"}}));
        let rules = out.rules.as_object().unwrap();
        assert!(!rules.contains_key("$other"));
        assert_eq!(rules["$uid"][".validate"], json!("auth.uid == $uid"));
    }

    #[test]
    fn read_write_shorthand_splits_with_bases() {
        let out = compile_doc(json!({"root": {
            "box": {
                ".ref": "owner",
                "$item": {".read/write": "owner.locked == false"}
            }
        }}));
        let item = &out.rules["box"]["$item"];
        assert_eq!(
            item[".read"],
            json!("data.parent().child('locked').val() == false")
        );
        assert_eq!(
            item[".write"],
            json!("newData.parent().child('locked').val() == false")
        );
    }

    #[test]
    fn read_write_conflict_is_rejected() {
        let err = compile(&json!({"root": {
            "x": {".read/write": "true", ".read": "true"}
        }}))
        .unwrap_err();
        assert!(matches!(err, CompileError::ReadWriteConflict { .. }));
    }

    #[test]
    fn required_children_synthesize_has_children() {
        let out = compile_doc(json!({"root": {
            "name": "required string",
            "age": "required number"
        }}));
        assert_eq!(
            out.rules[".validate"],
            json!("newData.hasChildren(['name', 'age'])")
        );
    }

    #[test]
    fn value_expression_conjoined_with_has_children() {
        let out = compile_doc(json!({"root": {
            "v": {
                ".value": "next.a == 1 || next.b == 2",
                "a": "required number"
            }
        }}));
        assert_eq!(
            out.rules["v"][".validate"],
            json!(
                "(newData.child('a').val() == 1 || newData.child('b').val() == 2) && newData.hasChildren(['a'])"
            )
        );
    }

    #[test]
    fn indexed_wildcard_emits_value_index() {
        let out = compile_doc(json!({"root": {
            "scores": {"$score": "indexed number"}
        }}));
        assert_eq!(out.rules["scores"][".indexOn"], json!([".value"]));
    }

    #[test]
    fn indexed_literal_attaches_to_wildcard_ancestor() {
        let out = compile_doc(json!({"root": {
            "chats": {"$chat": {"timestamp": "indexed number"}}
        }}));
        assert_eq!(out.rules["chats"][".indexOn"], json!(["timestamp"]));
        assert!(
            out.rules["chats"]["$chat"]
                .as_object()
                .unwrap()
                .get(".indexChildrenOn")
                .is_none()
        );
    }

    #[test]
    fn deep_index_paths_are_prefixed() {
        let out = compile_doc(json!({"root": {
            "chats": {"$chat": {"meta": {"timestamp": "indexed number"}}}
        }}));
        assert_eq!(out.rules["chats"][".indexOn"], json!(["meta/timestamp"]));
    }

    #[test]
    fn dangling_deep_index_is_rejected() {
        let err = compile(&json!({"root": {"timestamp": "indexed number"}})).unwrap_err();
        assert!(matches!(
            err,
            CompileError::DanglingDeepIndex { keys } if keys == vec!["timestamp".to_owned()]
        ));
    }

    #[test]
    fn required_on_wildcard_is_rejected() {
        let err = compile(&json!({"root": {"$x": "required string"}})).unwrap_err();
        assert!(matches!(err, CompileError::RequiredOnWildcard { .. }));
    }

    #[test]
    fn duplicated_keyword_is_rejected() {
        let err =
            compile(&json!({"root": {"x": "encrypted encrypted[#] string"}})).unwrap_err();
        assert!(matches!(
            err,
            CompileError::DuplicatedKeyword { keyword, .. } if keyword == "encrypted"
        ));
    }

    #[test]
    fn unknown_control_key_is_rejected() {
        let err = compile(&json!({"root": {".bogus": "true"}})).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnknownControlKey { key, .. } if key == ".bogus"
        ));
    }

    #[test]
    fn multiple_wildcards_are_rejected() {
        let err = compile(&json!({"root": {"$a": "string", "$b": "string"}})).unwrap_err();
        assert!(matches!(err, CompileError::MultipleWildcards { .. }));
    }

    #[test]
    fn few_on_literal_key_is_rejected() {
        let err = compile(&json!({"root": {"files/few": "string"}})).unwrap_err();
        assert!(matches!(err, CompileError::FewOnLiteral { .. }));
    }

    #[test]
    fn ref_shadowing_is_rejected() {
        let err = compile(&json!({"root": {".ref": "auth", "x": "string"}})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidRef { .. }));

        let err = compile(&json!({"root": {
            ".ref": "box",
            "inner": {".ref": "box", "x": "string"}
        }}))
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidRef { reason, .. } if reason == "already in scope"
        ));
    }

    #[test]
    fn ref_cannot_be_a_wildcard_name() {
        let err = compile(&json!({"root": {".ref": "$x"}})).unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidRef { reason, .. } if reason == "wildcard names cannot be refs"
        ));
    }

    #[test]
    fn missing_root_is_rejected() {
        assert!(matches!(
            compile(&json!({"functions": []})).unwrap_err(),
            CompileError::MissingRoot
        ));
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        assert!(matches!(
            compile(&json!(["nope"])).unwrap_err(),
            CompileError::InvalidDocument
        ));
    }

    #[test]
    fn invalid_node_is_rejected() {
        let err = compile(&json!({"root": {"x": 7}})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidNode { .. }));
    }

    #[test]
    fn extra_top_level_keys_are_ignored() {
        let out = compile_doc(json!({
            "anchors": {"whatever": true},
            "root": {"x": "string"}
        }));
        assert!(out.rules.as_object().unwrap().contains_key("x"));
    }

    #[test]
    fn expression_errors_carry_path_context() {
        let err = compile(&json!({"root": {"deep": {"x": "bogus == 1"}}})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown reference 'bogus' in 'bogus == 1' (at root/deep/x)"
        );
    }

    #[test]
    fn syntax_errors_carry_path_context() {
        let err = compile(&json!({"root": {"x": "a = b"}})).unwrap_err();
        assert!(matches!(err, CompileError::ExpressionSyntax { .. }));
        assert!(err.to_string().contains("(at root/x)"));
    }

    // -- YAML document conversion --

    #[test]
    fn yaml_scalar_keys_are_stringified() {
        let decoded: serde_yaml::Value = serde_yaml::from_str("root:\n  1: string\n").unwrap();
        let document = document_from_yaml(decoded).unwrap();
        assert_eq!(document["root"]["1"], json!("string"));
    }

    #[test]
    fn yaml_preserves_mapping_order() {
        let decoded: serde_yaml::Value =
            serde_yaml::from_str("root:\n  b: string\n  a: string\n").unwrap();
        let document = document_from_yaml(decoded).unwrap();
        let keys: Vec<&String> = document["root"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}

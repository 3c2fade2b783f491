use serde_json::{Map, Value};

/// Pull every `.encrypt` descriptor out of the rules tree, returning a
/// parallel tree that keeps only the descriptors and the keys on the path to
/// them. The rules tree is left without any `.encrypt` entries. `None` when
/// the tree carries no encryption annotations.
pub(crate) fn extract(rules: &mut Map<String, Value>) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    if let Some(descriptor) = rules.remove(".encrypt") {
        out.insert(".encrypt".to_owned(), descriptor);
    }
    for (key, value) in rules.iter_mut() {
        if key.starts_with('.') {
            continue;
        }
        if let Value::Object(child) = value
            && let Some(sub) = extract(child)
        {
            out.insert(key.clone(), Value::Object(sub));
        }
    }
    (!out.is_empty()).then_some(out)
}

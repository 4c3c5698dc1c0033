//! Structural JSON diff producing add/remove/replace operations addressed by
//! JSON pointers, and the matching applier.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::PatchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

/// Operations turning `old` into `new`. Empty when they are equal.
pub fn diff(
    old: &Value,
    new: &Value,
) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_at(String::new(), old, new, &mut ops);
    ops
}

fn diff_at(
    pointer: String,
    old: &Value,
    new: &Value,
    ops: &mut Vec<PatchOp>,
) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (name, value) in before {
                let child = format!("{}/{}", pointer, escape(name));
                match after.get(name) {
                    Some(next) => diff_at(child, value, next, ops),
                    None => ops.push(PatchOp::Remove { path: child }),
                }
            }
            for (name, value) in after {
                if !before.contains_key(name) {
                    ops.push(PatchOp::Add {
                        path: format!("{}/{}", pointer, escape(name)),
                        value: value.clone(),
                    });
                }
            }
        }
        (Value::Array(before), Value::Array(after)) => {
            let common = before.len().min(after.len());
            for i in 0..common {
                diff_at(format!("{}/{}", pointer, i), &before[i], &after[i], ops);
            }
            for (i, value) in after.iter().enumerate().skip(common) {
                ops.push(PatchOp::Add {
                    path: format!("{}/{}", pointer, i),
                    value: value.clone(),
                });
            }
            // Highest index first so earlier removals do not shift later ones.
            for i in (common..before.len()).rev() {
                ops.push(PatchOp::Remove {
                    path: format!("{}/{}", pointer, i),
                });
            }
        }
        _ => ops.push(PatchOp::Replace {
            path: pointer,
            value: new.clone(),
        }),
    }
}

/// Applies `ops` in order to `doc`.
pub fn apply(
    doc: &mut Value,
    ops: &[PatchOp],
) -> Result<(), PatchError> {
    for op in ops {
        match op {
            PatchOp::Replace { path, value } => {
                let target = doc
                    .pointer_mut(path)
                    .ok_or_else(|| PatchError::MissingTarget(path.clone()))?;
                *target = value.clone();
            }
            PatchOp::Add { path, value } => {
                let (parent, token) = split_pointer(path)?;
                match parent_of(doc, path, parent)? {
                    Value::Object(map) => {
                        map.insert(token, value.clone());
                    }
                    Value::Array(items) => {
                        if token == "-" {
                            items.push(value.clone());
                        } else {
                            let index = array_index(&token, path, items.len())?;
                            items.insert(index, value.clone());
                        }
                    }
                    _ => return Err(PatchError::NotContainer(path.clone())),
                }
            }
            PatchOp::Remove { path } => {
                let (parent, token) = split_pointer(path)?;
                match parent_of(doc, path, parent)? {
                    Value::Object(map) => {
                        map.remove(&token)
                            .ok_or_else(|| PatchError::MissingTarget(path.clone()))?;
                    }
                    Value::Array(items) => {
                        let index = array_index(&token, path, items.len().saturating_sub(1))?;
                        if index >= items.len() {
                            return Err(PatchError::InvalidIndex(path.clone()));
                        }
                        items.remove(index);
                    }
                    _ => return Err(PatchError::NotContainer(path.clone())),
                }
            }
        }
    }
    Ok(())
}

fn parent_of<'a>(
    doc: &'a mut Value,
    path: &str,
    parent: &str,
) -> Result<&'a mut Value, PatchError> {
    doc.pointer_mut(parent)
        .ok_or_else(|| PatchError::MissingTarget(path.to_string()))
}

/// Splits `/a/b~1c` into the parent pointer `/a` and the unescaped token `b/c`.
fn split_pointer(path: &str) -> Result<(&str, String), PatchError> {
    match path.rfind('/') {
        Some(pos) => Ok((&path[..pos], unescape(&path[pos + 1..]))),
        None => Err(PatchError::MissingTarget(path.to_string())),
    }
}

fn array_index(
    token: &str,
    path: &str,
    max: usize,
) -> Result<usize, PatchError> {
    match token.parse::<usize>() {
        Ok(index) if index <= max => Ok(index),
        _ => Err(PatchError::InvalidIndex(path.to_string())),
    }
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

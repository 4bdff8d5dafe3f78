//! Declarative update language for `function_kwargs`.
//!
//! A [`DictMod`] names one operator applied at a `path` of object
//! keys/array indices inside a JSON value. `apply_all` threads a batch of
//! mods through a kwargs object in order.

use crate::error::DictModError;
use serde::{Deserialize, Serialize};

/// One declarative mutation, selected by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DictMod {
    /// Replace (or insert) the value at `path`.
    Set {
        /// Path of object keys / array indices to the target location.
        path: Vec<String>,
        /// The value to write.
        value: serde_json::Value,
    },
    /// Remove the key/index at `path`.
    Unset {
        /// Path of object keys / array indices to the target location.
        path: Vec<String>,
    },
    /// Add `by` (default 1) to the number at `path`.
    Inc {
        /// Path of object keys / array indices to the target location.
        path: Vec<String>,
        /// The amount to add; defaults to 1 when omitted.
        #[serde(default = "default_inc_by")]
        by: f64,
    },
    /// Append `value` to the array at `path`.
    Push {
        /// Path of object keys / array indices to the target array.
        path: Vec<String>,
        /// The value to append.
        value: serde_json::Value,
    },
    /// Append each element of `values` to the array at `path`.
    PushAll {
        /// Path of object keys / array indices to the target array.
        path: Vec<String>,
        /// The values to append, in order.
        values: Vec<serde_json::Value>,
    },
    /// Remove every element equal to `value` from the array at `path`.
    Pull {
        /// Path of object keys / array indices to the target array.
        path: Vec<String>,
        /// The value whose occurrences are removed.
        value: serde_json::Value,
    },
    /// Move the value at `path` to `to`, removing the original key.
    Rename {
        /// Path of object keys / array indices to the source location.
        path: Vec<String>,
        /// Path of object keys / array indices to the destination location.
        to: Vec<String>,
    },
}

fn default_inc_by() -> f64 {
    1.0
}

impl DictMod {
    /// Parse a single operator from its raw JSON form (as it would arrive
    /// from an external caller rather than a compiled-in literal),
    /// rejecting tags this crate does not implement.
    pub fn from_value(raw: &serde_json::Value) -> Result<Self, DictModError> {
        let op = raw
            .get("op")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        match op {
            "set" | "unset" | "inc" | "push" | "push_all" | "pull" | "rename" => {
                serde_json::from_value(raw.clone()).map_err(|_| DictModError::BadPath {
                    path: raw
                        .get("path")
                        .and_then(|p| serde_json::from_value(p.clone()).ok())
                        .unwrap_or_default(),
                })
            }
            other => Err(DictModError::UnknownOperator {
                operator: other.to_owned(),
            }),
        }
    }
}

/// Apply a batch of [`DictMod`]s to `target` in order, returning the
/// mutated value.
pub fn apply_all(
    target: &serde_json::Value,
    mods: &[DictMod],
) -> Result<serde_json::Value, DictModError> {
    let mut target = target.clone();
    for dict_mod in mods {
        apply_one(&mut target, dict_mod)?;
    }
    Ok(target)
}

fn apply_one(target: &mut serde_json::Value, dict_mod: &DictMod) -> Result<(), DictModError> {
    match dict_mod {
        DictMod::Set { path, value } => {
            *locate_or_create(target, path)? = value.clone();
            Ok(())
        }
        DictMod::Unset { path } => remove_at(target, path),
        DictMod::Inc { path, by } => {
            let slot = locate(target, path)?;
            let current = slot.as_f64().ok_or_else(|| DictModError::BadPath {
                path: path.clone(),
            })?;
            *slot = numeric_value(current + by);
            Ok(())
        }
        DictMod::Push { path, value } => {
            let slot = locate_or_create_array(target, path)?;
            slot.push(value.clone());
            Ok(())
        }
        DictMod::PushAll { path, values } => {
            let slot = locate_or_create_array(target, path)?;
            slot.extend(values.iter().cloned());
            Ok(())
        }
        DictMod::Pull { path, value } => {
            let slot = locate_or_create_array(target, path)?;
            slot.retain(|item| item != value);
            Ok(())
        }
        DictMod::Rename { path, to } => {
            let value = take_at(target, path)?;
            *locate_or_create(target, to)? = value;
            Ok(())
        }
    }
}

fn numeric_value(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Navigate to `path`, requiring every segment to already exist.
fn locate<'a>(
    value: &'a mut serde_json::Value,
    path: &[String],
) -> Result<&'a mut serde_json::Value, DictModError> {
    let mut current = value;
    for key in path {
        current = step_into(current, key).ok_or_else(|| DictModError::BadPath {
            path: path.to_vec(),
        })?;
    }
    Ok(current)
}

fn step_into<'a>(value: &'a mut serde_json::Value, key: &str) -> Option<&'a mut serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.get_mut(key),
        serde_json::Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get_mut(i)),
        _ => None,
    }
}

/// Navigate to `path`, creating missing intermediate objects and the final
/// key as needed (arrays are never auto-extended by index).
fn locate_or_create<'a>(
    value: &'a mut serde_json::Value,
    path: &[String],
) -> Result<&'a mut serde_json::Value, DictModError> {
    let mut current = value;
    for key in path {
        if !matches!(current, serde_json::Value::Object(_) | serde_json::Value::Array(_)) {
            *current = serde_json::Value::Object(serde_json::Map::new());
        }
        match current {
            serde_json::Value::Object(map) => {
                current = map.entry(key.clone()).or_insert(serde_json::Value::Null);
            }
            serde_json::Value::Array(arr) => {
                let index = key.parse::<usize>().map_err(|_| DictModError::BadPath {
                    path: path.to_vec(),
                })?;
                if index >= arr.len() {
                    return Err(DictModError::BadPath {
                        path: path.to_vec(),
                    });
                }
                current = &mut arr[index];
            }
            _ => unreachable!("just normalised to object or array"),
        }
    }
    Ok(current)
}

fn locate_or_create_array<'a>(
    value: &'a mut serde_json::Value,
    path: &[String],
) -> Result<&'a mut Vec<serde_json::Value>, DictModError> {
    let slot = locate_or_create(value, path)?;
    if slot.is_null() {
        *slot = serde_json::Value::Array(Vec::new());
    }
    slot.as_array_mut().ok_or_else(|| DictModError::BadPath {
        path: path.to_vec(),
    })
}

fn remove_at(value: &mut serde_json::Value, path: &[String]) -> Result<(), DictModError> {
    let (last, parent_path) = path.split_last().ok_or_else(|| DictModError::BadPath {
        path: path.to_vec(),
    })?;
    let parent = locate(value, parent_path)?;
    match parent {
        serde_json::Value::Object(map) => {
            map.remove(last);
            Ok(())
        }
        serde_json::Value::Array(arr) => {
            let index = last.parse::<usize>().map_err(|_| DictModError::BadPath {
                path: path.to_vec(),
            })?;
            if index < arr.len() {
                arr.remove(index);
                Ok(())
            } else {
                Err(DictModError::BadPath {
                    path: path.to_vec(),
                })
            }
        }
        _ => Err(DictModError::BadPath {
            path: path.to_vec(),
        }),
    }
}

fn take_at(
    value: &mut serde_json::Value,
    path: &[String],
) -> Result<serde_json::Value, DictModError> {
    let (last, parent_path) = path.split_last().ok_or_else(|| DictModError::BadPath {
        path: path.to_vec(),
    })?;
    let parent = locate(value, parent_path)?;
    match parent {
        serde_json::Value::Object(map) => {
            map.remove(last).ok_or_else(|| DictModError::BadPath {
                path: path.to_vec(),
            })
        }
        serde_json::Value::Array(arr) => {
            let index = last.parse::<usize>().map_err(|_| DictModError::BadPath {
                path: path.to_vec(),
            })?;
            if index < arr.len() {
                Ok(arr.remove(index))
            } else {
                Err(DictModError::BadPath {
                    path: path.to_vec(),
                })
            }
        }
        _ => Err(DictModError::BadPath {
            path: path.to_vec(),
        }),
    }
}

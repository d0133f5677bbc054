//! Transfer extraction over arbitrary payloads.

use std::collections::HashSet;

use crate::transfer::{Identity, Transferable};
use crate::value::{Array, Object, Value};

/// A structurally cleaned payload together with its transferable leaves.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub message: Value,
    pub transfer: Vec<Transferable>,
}

/// Collect every transferable leaf reachable from `value`, in depth-first
/// order. Each composite and each leaf is visited at most once, so cyclic
/// payloads terminate and a leaf referenced twice is listed once.
pub fn extract_transfer(value: &Value) -> Vec<Transferable> {
    let mut visited = HashSet::new();
    let mut composites = 0;
    let mut out = Vec::new();
    let mut stack = vec![value.clone()];

    while let Some(current) = stack.pop() {
        match &current {
            Value::Transferable(transferable) => {
                if transferable.first_visit(&mut visited) {
                    out.push(transferable.clone());
                }
            }
            Value::Array(array) => {
                if visited.insert(Identity::Composite(array.addr())) {
                    composites += 1;
                    stack.extend(array.to_vec().into_iter().rev());
                }
            }
            Value::Object(object) => {
                if visited.insert(Identity::Composite(object.addr())) {
                    composites += 1;
                    stack.extend(object.values().into_iter().rev());
                }
            }
            _ => {}
        }
    }

    tracing::trace!(
        leaves = out.len(),
        composites,
        "extracted transfer hints"
    );
    out
}

/// Like [`extract_transfer`], but also returns a fresh copy of the payload's
/// array/object skeleton. A composite reached a second time (shared or
/// cyclic) is referenced rather than copied again.
pub fn extract_message(value: &Value) -> Extracted {
    let mut visited = HashSet::new();
    let mut transfer = Vec::new();
    let message = clean(value, &mut visited, &mut transfer);
    Extracted { message, transfer }
}

fn clean(value: &Value, visited: &mut HashSet<Identity>, transfer: &mut Vec<Transferable>) -> Value {
    match value {
        Value::Transferable(transferable) => {
            if transferable.first_visit(visited) {
                transfer.push(transferable.clone());
            }
            value.clone()
        }
        Value::Array(array) => {
            if !visited.insert(Identity::Composite(array.addr())) {
                return value.clone();
            }
            let items = array
                .to_vec()
                .iter()
                .map(|item| clean(item, visited, transfer))
                .collect();
            Value::Array(Array::from_vec(items))
        }
        Value::Object(object) => {
            if !visited.insert(Identity::Composite(object.addr())) {
                return value.clone();
            }
            let entries = object
                .to_map()
                .iter()
                .map(|(key, item)| (key.clone(), clean(item, visited, transfer)))
                .collect();
            Value::Object(Object::from_map(entries))
        }
        _ => value.clone(),
    }
}

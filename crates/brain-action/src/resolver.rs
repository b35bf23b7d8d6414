//! Conflict detection and prerequisite ordering for one turn's actions.

use std::collections::HashMap;

use crate::definition::ActionDefinition;
use crate::error::OrderError;

/// A pair of same-turn actions where the earlier declares the later as its opposite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub first: usize,
    pub second: usize,
    pub first_name: String,
    pub second_name: String,
}

/// Flag pairs `(i, j)`, `i < j`, where `actions[i].opposite_action` names `actions[j]`.
///
/// Only the earlier action's declaration is consulted. A pair is caught in
/// both orders only when both actions declare each other.
pub fn detect_conflicts(actions: &[ActionDefinition]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, a) in actions.iter().enumerate() {
        let Some(opposite) = a.prereqs.opposite_action.as_deref() else {
            continue;
        };
        for (j, b) in actions.iter().enumerate().skip(i + 1) {
            if b.canonical_name == opposite {
                conflicts.push(Conflict {
                    first: i,
                    second: j,
                    first_name: a.canonical_name.clone(),
                    second_name: b.canonical_name.clone(),
                });
            }
        }
    }
    conflicts
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Indices of `actions` with every prerequisite before its dependents.
///
/// Prerequisites outside the set are treated as satisfied. Unrelated actions
/// keep their input order, and repeated names stay adjacent in input order.
/// A cycle is rejected with the offending path.
pub fn order_by_dependencies(actions: &[ActionDefinition]) -> Result<Vec<usize>, OrderError> {
    let mut names: Vec<&str> = Vec::new();
    let mut indices: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut prereqs: HashMap<&str, &[String]> = HashMap::new();
    for (i, action) in actions.iter().enumerate() {
        let name = action.canonical_name.as_str();
        let slots = indices.entry(name).or_default();
        if slots.is_empty() {
            names.push(name);
            prereqs.insert(name, &action.prereqs.prerequisite_actions);
        }
        slots.push(i);
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();
    let mut order = Vec::with_capacity(actions.len());
    for name in names.iter().copied() {
        visit(name, &prereqs, &indices, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    prereqs: &HashMap<&'a str, &'a [String]>,
    indices: &HashMap<&'a str, Vec<usize>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<usize>,
) -> Result<(), OrderError> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(OrderError::CyclicPrerequisites(cycle));
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    path.push(name);
    if let Some(deps) = prereqs.get(name) {
        for dep in deps.iter() {
            if let Some((&dep_name, _)) = indices.get_key_value(dep.as_str()) {
                visit(dep_name, prereqs, indices, marks, path, order)?;
            }
        }
    }
    path.pop();
    marks.insert(name, Mark::Done);
    if let Some(slots) = indices.get(name) {
        order.extend(slots);
    }
    Ok(())
}

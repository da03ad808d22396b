//! # Re-nesting
//!
//! Rebuilds a forest from a flat list of same-shaped entities linked by an
//! identifier and a parent identifier. Keys are compared by their rendered
//! text, so an `Int32` parent id matches an `Int64` id.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::entity::{Node, downcast};
use crate::error::{Error, Result};

/// Field names that link entities into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nesting {
    /// Identifier field.
    pub id: String,

    /// Parent identifier field.
    pub parent_id: String,

    /// One-to-many relation receiving the children.
    pub children: String,
}

impl Nesting {
    /// Describes a nesting.
    #[must_use]
    pub fn new(
        id: impl Into<String>, parent_id: impl Into<String>, children: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            children: children.into(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Attaches every entity whose parent id matches another entity's id to that
/// entity's `children` relation and returns the remaining roots in input
/// order.
///
/// An entity becomes a root when its parent id is `NULL`, names itself or
/// matches nothing. Entities on a parent cycle are promoted to roots so no
/// entity is lost. Siblings keep their input order. When two entities share
/// an id, children attach to the first.
///
/// # Errors
///
/// Returns [`Error::Config`] when an entity has no `children` relation.
pub fn renest(items: Vec<Box<dyn Node>>, nesting: &Nesting) -> Result<Vec<Box<dyn Node>>> {
    let count = items.len();
    let ids: Vec<Option<String>> = items
        .iter()
        .map(|item| item.get_field(&nesting.id).and_then(|value| value.render()))
        .collect();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(count);
    for (position, id) in ids.iter().enumerate() {
        if let Some(id) = id {
            index.entry(id.as_str()).or_insert(position);
        }
    }

    let mut parents: Vec<Option<usize>> = items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let parent = item.get_field(&nesting.parent_id).and_then(|value| value.render())?;
            index.get(parent.as_str()).copied().filter(|&found| found != position)
        })
        .collect();

    break_cycles(&mut parents);

    let depths = depths(&parents);
    let mut order: Vec<usize> =
        (0..count).filter(|&position| parents[position].is_some()).collect();
    order.sort_by(|a, b| depths[*b].cmp(&depths[*a]).then(a.cmp(b)));

    let mut slots: Vec<Option<Box<dyn Node>>> = items.into_iter().map(Some).collect();
    for position in order {
        let (Some(parent), Some(child)) = (parents[position], slots[position].take()) else {
            continue;
        };
        let Some(target) = slots[parent].as_deref_mut() else {
            continue;
        };
        let relation = target.relation_mut(&nesting.children, true).ok_or_else(|| {
            Error::config(&nesting.children, "entity has no child collection of this name")
        })?;
        relation.attach(child)?;
    }

    let roots: Vec<Box<dyn Node>> = slots.into_iter().flatten().collect();
    debug!(items = count, roots = roots.len(), "re-nested entities");
    Ok(roots)
}

/// Typed [`renest`].
///
/// # Errors
///
/// Returns an error if `T` has no `children` relation.
pub fn renest_typed<T: Node>(items: Vec<T>, nesting: &Nesting) -> Result<Vec<T>> {
    let nodes = items.into_iter().map(|item| Box::new(item) as Box<dyn Node>).collect();
    renest(nodes, nesting)?.into_iter().map(|node| downcast(node).map_err(Error::from)).collect()
}

// Clears the parent link of every entity that sits on a cycle.
fn break_cycles(parents: &mut [Option<usize>]) {
    let mut state = vec![Visit::Pending; parents.len()];

    for start in 0..parents.len() {
        let mut path = Vec::new();
        let mut current = Some(start);

        while let Some(position) = current {
            match state[position] {
                Visit::Done => break,
                Visit::Active => {
                    let from = path.iter().position(|&p| p == position).unwrap_or(0);
                    warn!(members = path.len() - from, "parent cycle; members become roots");
                    for &member in &path[from..] {
                        parents[member] = None;
                    }
                    break;
                }
                Visit::Pending => {
                    state[position] = Visit::Active;
                    path.push(position);
                    current = parents[position];
                }
            }
        }

        for position in path {
            state[position] = Visit::Done;
        }
    }
}

fn depths(parents: &[Option<usize>]) -> Vec<usize> {
    let mut depths: Vec<Option<usize>> = vec![None; parents.len()];

    for start in 0..parents.len() {
        let mut path = Vec::new();
        let mut current = start;
        let mut known = None;
        loop {
            if let Some(depth) = depths[current] {
                known = Some(depth);
                break;
            }
            path.push(current);
            match parents[current] {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let mut depth = known.map_or(0, |depth| depth + 1);
        for &position in path.iter().rev() {
            depths[position] = Some(depth);
            depth += 1;
        }
    }

    depths.into_iter().map(|depth| depth.unwrap_or(0)).collect()
}

#[cfg(test)]
mod tests {
    use trellis_sql::DataType;

    use super::*;
    use crate::map::MapEntity;

    crate::entity! {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct Category {
            pub id: i64,
            pub parent_id: Option<i64>,
            pub name: String,
        }
        relations {
            pub children: many Category,
        }
    }

    fn category(id: i64, parent_id: Option<i64>) -> Category {
        Category {
            id,
            parent_id,
            name: format!("c{id}"),
            children: Vec::new(),
        }
    }

    fn nesting() -> Nesting {
        Nesting::new("id", "parent_id", "children")
    }

    #[test]
    fn builds_forest_in_input_order() {
        let items = vec![
            category(3, Some(1)),
            category(1, None),
            category(4, Some(3)),
            category(2, None),
            category(5, Some(1)),
            category(6, Some(99)),
        ];
        let roots = renest_typed(items, &nesting()).unwrap();

        let ids: Vec<_> = roots.iter().map(|root| root.id).collect();
        assert_eq!(ids, vec![1, 2, 6]);
        let children: Vec<_> = roots[0].children.iter().map(|child| child.id).collect();
        assert_eq!(children, vec![3, 5]);
        assert_eq!(roots[0].children[0].children[0].id, 4);
    }

    #[test]
    fn self_parent_and_cycles_become_roots() {
        let items = vec![
            category(1, Some(1)),
            category(2, Some(3)),
            category(3, Some(2)),
            category(4, Some(2)),
        ];
        let roots = renest_typed(items, &nesting()).unwrap();

        let ids: Vec<_> = roots.iter().map(|root| root.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(roots[1].children.len(), 1);
        assert_eq!(roots[1].children[0].id, 4);
    }

    #[test]
    fn keys_match_across_widths() {
        let items: Vec<Box<dyn Node>> = vec![
            Box::new(MapEntity::from_pairs([("id", DataType::Int64(Some(1)))])),
            Box::new(MapEntity::from_pairs([
                ("id", DataType::Int32(Some(2))),
                ("parent", DataType::Int32(Some(1))),
            ])),
        ];
        let roots = renest(items, &Nesting::new("id", "parent", "children")).unwrap();
        assert_eq!(roots.len(), 1);

        let root = downcast::<MapEntity>(roots.into_iter().next().unwrap()).unwrap();
        assert_eq!(root.many("children").len(), 1);
    }

    #[test]
    fn missing_relation_is_config_error() {
        let items = vec![category(1, None), category(2, Some(1))];
        let err = renest_typed(items, &Nesting::new("id", "parent_id", "kids")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn depth_of_chain() {
        let parents = vec![Some(1), Some(2), None, Some(0)];
        assert_eq!(depths(&parents), vec![2, 1, 0, 3]);
    }
}

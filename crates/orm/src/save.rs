//! # Save
//!
//! An entity graph is flattened into write rows, rule by rule, root first.
//! Each row remembers its lineage (the instance ordinal at every level of
//! its expression path), which ties generated identifiers to the rows that
//! reference them and lets generated values flow back into the graph once
//! every statement has run.
//!
//! Updates reconcile the desired graph against the persisted one by row
//! identity: matched rows are updated when a column changed, new rows are
//! inserted and rows missing from the desired graph are deleted, deepest
//! first.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::{debug, trace};
use trellis_sql::{DataType, Params};

use crate::accessor::{Accessor, ParamFilter};
use crate::entity::Node;
use crate::error::{Error, Result};
use crate::fetch;
use crate::row::Row;
use crate::rule::RuleTree;

/// Statement counts for one save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Rows inserted.
    pub inserted: usize,

    /// Rows updated.
    pub updated: usize,

    /// Rows deleted.
    pub deleted: usize,

    /// Matched rows left untouched because no column changed.
    pub unchanged: usize,
}

/// Flattens `root` into one row per attached entity of every writable rule,
/// root first and then in nesting order. Lock columns carry the values to
/// write; the values expected in the store are attached to each row.
///
/// # Errors
///
/// Returns an error if a write or lock callback fails.
pub fn write_rows<'t>(tree: &'t RuleTree, root: &dyn Node) -> Result<Vec<Row<'t>>> {
    Ok(collect(tree, root)?.into_iter().map(|(_, row)| row).collect())
}

fn collect<'t>(tree: &'t RuleTree, root: &dyn Node) -> Result<Vec<(usize, Row<'t>)>> {
    let mut rows = Vec::new();

    for (index, rule) in tree.rules().iter().enumerate() {
        if !rule.is_writable() {
            continue;
        }

        let mut found = Vec::new();
        instances(tree, &tree.chain(index), root, &mut Vec::new(), &mut found);

        for (lineage, node) in found {
            let mut columns = rule
                .columns(node)
                .map_err(|err| err.context(format!("reading '{}'", label(rule.path()))))?;
            let mut expected = Vec::new();
            if let Some((current, next)) = rule.lock_values(node)? {
                for (column, value) in next {
                    put(&mut columns, column, value);
                }
                expected = current;
            }

            let row =
                Row::from_columns(rule, columns).with_lock_current(expected).with_lineage(lineage);
            rows.push((index, row));
        }
    }

    Ok(rows)
}

// Collects the entities at the end of `chain` with their instance ordinals.
fn instances<'n>(
    tree: &RuleTree, chain: &[usize], node: &'n dyn Node, lineage: &mut Vec<usize>,
    out: &mut Vec<(Vec<usize>, &'n dyn Node)>,
) {
    let Some((&first, rest)) = chain.split_first() else {
        out.push((lineage.clone(), node));
        return;
    };

    let rule = &tree.rules()[first];
    let Some(relation) = node.relation(rule.segment()) else {
        return;
    };
    for (ordinal, item) in relation.items().into_iter().enumerate() {
        lineage.push(ordinal);
        instances(tree, rest, item, lineage, out);
        lineage.pop();
    }
}

fn locate_mut<'n>(
    tree: &RuleTree, chain: &[usize], lineage: &[usize], root: &'n mut dyn Node,
) -> Option<&'n mut dyn Node> {
    let mut node = root;
    for (&index, &ordinal) in chain.iter().zip(lineage) {
        let rule = &tree.rules()[index];
        let relation = node.relation_mut(rule.segment(), rule.is_many())?;
        node = relation.items_mut().into_iter().nth(ordinal)?;
    }
    Some(node)
}

fn put(columns: &mut IndexMap<String, DataType>, column: String, value: DataType) {
    let key = columns.keys().find(|key| key.eq_ignore_ascii_case(&column)).cloned();
    columns.insert(key.unwrap_or(column), value);
}

fn label(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

fn same(a: Option<&DataType>, b: Option<&DataType>) -> bool {
    a.and_then(DataType::render) == b.and_then(DataType::render)
}

struct Capture {
    rule: usize,
    lineage: Vec<usize>,
    value: DataType,
}

struct WriteBack {
    rule: usize,
    lineage: Vec<usize>,
    column: String,
    value: DataType,
}

/// Executes one save against an accessor.
///
/// Captured identifiers and pending write-backs live in the saver, never in
/// the rule tree, so a tree can serve any number of saves.
pub struct Saver<'t, 'c> {
    tree: &'t RuleTree,
    accessor: Accessor<'c>,
    captures: Vec<Capture>,
    write_backs: Vec<WriteBack>,
    stats: SaveStats,
}

impl<'t, 'c> Saver<'t, 'c> {
    /// Prepares a save over a validated tree.
    #[must_use]
    pub const fn new(tree: &'t RuleTree, accessor: Accessor<'c>) -> Self {
        Self {
            tree,
            accessor,
            captures: Vec::new(),
            write_backs: Vec::new(),
            stats: SaveStats {
                inserted: 0,
                updated: 0,
                deleted: 0,
                unchanged: 0,
            },
        }
    }

    /// Inserts every row of the graph, parents before children. Generated
    /// identifiers, relation ids and new lock values are written back into
    /// `root`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransaction`] without an open transaction,
    /// [`Error::Relation`] when a relation id has no captured identifier, or
    /// the first failing statement's error.
    pub fn insert(mut self, root: &mut dyn Node) -> Result<SaveStats> {
        self.require_transaction()?;
        let rows = self.keyed(collect(self.tree, root)?, false)?;
        for (index, row) in rows {
            self.insert_row(index, row)?;
        }
        self.finish(root)
    }

    /// Reconciles the graph with its persisted state, loaded through
    /// `key_query`. The query receives the root's primary-key values as
    /// parameters named after the key columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Ambiguous`] unless exactly one
    /// persisted root is found, [`Error::IdentityMismatch`] when it is not
    /// the root being saved, and [`Error::Conflict`] when a row changed since
    /// it was read.
    pub fn update(mut self, root: &mut dyn Node, key_query: &str) -> Result<SaveStats> {
        self.require_transaction()?;
        let tree = self.tree;
        if !tree.root().is_writable() {
            return Err(Error::config("", "updates need a writable root rule"));
        }

        let desired = self.keyed(collect(tree, root)?, true)?;
        let Some((_, desired_root)) = desired.first() else {
            return Err(Error::config("", "updates need a writable root rule"));
        };

        let mut params = Params::new();
        for key in desired_root.primary_keys() {
            let value = desired_root.column(key).cloned().unwrap_or_else(DataType::null);
            params = params.set(key.clone(), value);
        }
        let mut found = Vec::new();
        fetch::run(&mut self.accessor, tree, key_query, &params, None, |node| {
            found.push(node);
            Ok(())
        })?;
        let persisted = match found.len() {
            0 => return Err(Error::NotFound),
            1 => found.remove(0),
            count => return Err(Error::Ambiguous { count }),
        };

        let current = self.keyed(collect(tree, persisted.as_ref())?, true)?;
        let current_id = current.first().and_then(|(_, row)| row.identity());
        let desired_id = desired_root.identity();
        if current_id.is_none() || current_id != desired_id {
            return Err(Error::IdentityMismatch {
                current: current_id.unwrap_or_default(),
                desired: desired_id.unwrap_or_default(),
            });
        }

        let existing: HashMap<String, &Row> =
            current.iter().filter_map(|(_, row)| row.identity().map(|id| (id, row))).collect();
        let wanted: HashSet<String> =
            desired.iter().filter_map(|(_, row)| row.identity()).collect();

        for (index, row) in desired.iter().cloned() {
            let matched = row.identity().and_then(|id| existing.get(&id).copied());
            match matched {
                Some(stored) => self.update_existing(index, row, stored, index == 0)?,
                None => self.insert_row(index, row)?,
            }
        }

        let mut removed: Vec<&(usize, Row)> = current
            .iter()
            .filter(|(index, row)| {
                *index != 0 && row.identity().is_some_and(|id| !wanted.contains(&id))
            })
            .collect();
        removed.sort_by_key(|(index, _)| Reverse(tree.rules()[*index].depth()));
        for (_, row) in removed {
            self.delete_row(row)?;
        }

        self.finish(root)
    }

    /// Deletes every row of the graph, deepest level first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoTransaction`] without an open transaction or
    /// [`Error::Conflict`] when a row is gone or was changed since it was read.
    pub fn delete(mut self, root: &dyn Node) -> Result<SaveStats> {
        self.require_transaction()?;
        let tree = self.tree;
        let mut rows = self.keyed(collect(tree, root)?, true)?;
        rows.sort_by_key(|(index, _)| Reverse(tree.rules()[*index].depth()));
        for (_, row) in &rows {
            self.delete_row(row)?;
        }
        debug!(stats = ?self.stats, "delete complete");
        Ok(self.stats)
    }

    fn require_transaction(&self) -> Result<()> {
        if self.accessor.in_transaction() { Ok(()) } else { Err(Error::NoTransaction) }
    }

    // Attaches primary-key columns; reconciliation needs them on every table.
    fn keyed(
        &mut self, rows: Vec<(usize, Row<'t>)>, required: bool,
    ) -> Result<Vec<(usize, Row<'t>)>> {
        let mut keyed = Vec::with_capacity(rows.len());
        for (index, row) in rows {
            let Some(table) = row.table() else {
                return Err(Error::config(row.path(), "writable rule has no table"));
            };
            let keys = self.accessor.primary_keys(table)?;
            if required && keys.is_empty() {
                let reason = format!("table '{table}' has no primary key");
                return Err(Error::config(row.path(), reason));
            }
            keyed.push((index, row.with_primary_keys(keys)));
        }
        Ok(keyed)
    }

    fn insert_row(&mut self, index: usize, mut row: Row<'t>) -> Result<()> {
        let rule = row.rule();

        if let Some(relation) = rule.relation() {
            let value = self.captured(index, row.lineage()).ok_or_else(|| Error::Relation {
                path: rule.path().to_string(),
                column: relation.column.clone(),
                source_path: relation.source_path.clone(),
            })?;
            row.set(&relation.column, value.clone());
            self.write_back(index, &row, &relation.column, value);
        }

        if rule.is_auto_id() {
            let [key] = row.primary_keys() else {
                return Err(Error::config(rule.path(), "auto-id needs a single-column primary key"));
            };
            let key = key.clone();
            self.accessor.insert(&row, ParamFilter::NonPrimaryKeys)?;
            let id = self.accessor.last_insert_id()?;
            row.set(&key, id.clone());
            self.captures.push(Capture {
                rule: index,
                lineage: row.lineage().to_vec(),
                value: id.clone(),
            });
            self.write_back(index, &row, &key, id);
        } else {
            self.accessor.insert(&row, ParamFilter::All)?;
        }

        self.write_back_locks(index, &row);
        self.stats.inserted += 1;
        Ok(())
    }

    fn update_existing(
        &mut self, index: usize, mut row: Row<'t>, stored: &Row, always: bool,
    ) -> Result<()> {
        let rule = row.rule();

        if let Some(relation) = rule.relation()
            && let Some(value) = self.captured(index, row.lineage())
        {
            row.set(&relation.column, value.clone());
            self.write_back(index, &row, &relation.column, value);
        }
        if rule.is_auto_id()
            && let [key] = row.primary_keys()
            && let Some(id) = row.column(key)
        {
            self.captures.push(Capture {
                rule: index,
                lineage: row.lineage().to_vec(),
                value: id.clone(),
            });
        }

        if !always && !changed(&row, stored) {
            trace!(path = rule.path(), "row unchanged");
            self.stats.unchanged += 1;
            return Ok(());
        }

        if self.accessor.update(&row, ParamFilter::All)? == 0 {
            return Err(conflict(&row));
        }
        self.write_back_locks(index, &row);
        self.stats.updated += 1;
        Ok(())
    }

    fn delete_row(&mut self, row: &Row) -> Result<()> {
        if self.accessor.delete(row, ParamFilter::PrimaryKeys)? == 0 {
            return Err(conflict(row));
        }
        self.stats.deleted += 1;
        Ok(())
    }

    // Latest identifier generated at the rule's relation-id source within the
    // instances the row shares with that source.
    fn captured(&self, index: usize, lineage: &[usize]) -> Option<DataType> {
        let relation = self.tree.rules()[index].relation()?;
        let source = self.tree.position(&relation.source_path)?;

        let own = self.tree.chain(index);
        let theirs = self.tree.chain(source);
        let shared = own.iter().zip(&theirs).take_while(|(a, b)| a == b).count();
        let scope = &lineage[..shared.min(lineage.len())];

        self.captures
            .iter()
            .rev()
            .find(|capture| capture.rule == source && capture.lineage.starts_with(scope))
            .map(|capture| capture.value.clone())
    }

    fn write_back(&mut self, index: usize, row: &Row, column: &str, value: DataType) {
        self.write_backs.push(WriteBack {
            rule: index,
            lineage: row.lineage().to_vec(),
            column: column.to_string(),
            value,
        });
    }

    fn write_back_locks(&mut self, index: usize, row: &Row) {
        let Some(lock) = row.rule().optimistic_lock() else {
            return;
        };
        for column in &lock.columns {
            if let Some(value) = row.column(column) {
                self.write_back(index, row, column, value.clone());
            }
        }
    }

    fn finish(self, root: &mut dyn Node) -> Result<SaveStats> {
        for pending in &self.write_backs {
            let chain = self.tree.chain(pending.rule);
            let Some(node) = locate_mut(self.tree, &chain, &pending.lineage, root) else {
                continue;
            };
            let known = node.is_open()
                || node
                    .field_names()
                    .iter()
                    .any(|field| field.eq_ignore_ascii_case(&pending.column));
            if known {
                node.set_field(&pending.column, &pending.value)?;
            }
        }

        debug!(stats = ?self.stats, "save complete");
        Ok(self.stats)
    }
}

// Lock columns carry the next value on one side only and never count as a
// change.
fn changed(desired: &Row, stored: &Row) -> bool {
    let locks =
        desired.rule().optimistic_lock().map(|lock| lock.columns.as_slice()).unwrap_or_default();
    desired
        .columns()
        .filter(|(column, _)| !locks.iter().any(|lock| lock.eq_ignore_ascii_case(column)))
        .any(|(column, value)| !same(Some(value), stored.column(column)))
}

fn conflict(row: &Row) -> Error {
    Error::Conflict {
        table: row.table().unwrap_or_default().to_string(),
        identity: row.identity().unwrap_or_else(|| label(row.path()).to_string()),
    }
}

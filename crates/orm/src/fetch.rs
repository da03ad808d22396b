//! # Graph reconstruction
//!
//! A single forward pass over an ordered record stream. Each record is
//! scoped to the root rule for boundary detection, then to every other rule
//! in nesting order. Child instances are de-duplicated with a per-rule
//! seen-set that lives as long as the current root, and attached to the
//! most recent instance along their expression path.

use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};
use trellis_sql::{DataType, Params, Record};

use crate::accessor::Accessor;
use crate::entity::Node;
use crate::error::{Error, Result};
use crate::row::{Boundary, KEY_SEPARATOR, Row};
use crate::rule::RuleTree;

/// A 1-based page window over root entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Page number, starting at 1.
    pub number: usize,

    /// Roots per page.
    pub size: usize,
}

impl Page {
    /// Creates a page window.
    #[must_use]
    pub const fn new(number: usize, size: usize) -> Self {
        Self { number, size }
    }

    /// `true` when the `ordinal`-th root (1-based) falls inside the window.
    #[must_use]
    pub const fn contains(&self, ordinal: usize) -> bool {
        if self.number == 0 || self.size == 0 {
            return false;
        }
        let first = (self.number - 1).saturating_mul(self.size).saturating_add(1);
        let last = self.number.saturating_mul(self.size);
        ordinal >= first && ordinal <= last
    }
}

/// One page of roots and the number of roots in the whole stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    /// Roots inside the page window.
    pub items: Vec<T>,

    /// Root boundaries observed across the full stream.
    pub total: usize,
}

/// Push-driven reconstruction state for one fetch.
pub struct Reconstructor<'t> {
    tree: &'t RuleTree,
    chains: Vec<Vec<usize>>,
    page: Option<Page>,
    previous: Option<Rc<IndexMap<String, DataType>>>,
    current: Option<Box<dyn Node>>,
    seen: Vec<HashSet<String>>,
    total: usize,
}

impl<'t> Reconstructor<'t> {
    /// Starts a reconstruction over a validated tree.
    #[must_use]
    pub fn new(tree: &'t RuleTree) -> Self {
        let count = tree.rules().len();
        Self {
            tree,
            chains: (0..count).map(|index| tree.chain(index)).collect(),
            page: None,
            previous: None,
            current: None,
            seen: vec![HashSet::new(); count],
            total: 0,
        }
    }

    /// Only materializes roots inside `page`.
    #[must_use]
    pub const fn with_page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    /// Root boundaries observed so far.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Consumes one record. Returns the previous root when this record
    /// starts a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be bound or attached.
    pub fn push(&mut self, record: Record) -> Result<Option<Box<dyn Node>>> {
        let root_rule = self.tree.root();
        let row = Row::new(root_rule, record);
        let previous =
            self.previous.as_ref().map(|columns| Row::shared(root_rule, Rc::clone(columns)));

        let mut completed = None;
        match row.boundary(previous.as_ref()) {
            Boundary::Absent => {
                trace!(index = self.total, "row has no root instance; skipped");
                return Ok(None);
            }
            Boundary::New => {
                completed = self.current.take();
                for seen in &mut self.seen {
                    seen.clear();
                }
                self.total += 1;

                if self.page.is_none_or(|page| page.contains(self.total)) {
                    let mut root = root_rule.create();
                    root_rule.bind(root.as_mut(), &row).map_err(|err| {
                        err.context(format!("binding root #{}", self.total))
                    })?;
                    self.current = Some(root);
                }
            }
            Boundary::Continuation => {}
        }

        self.previous = Some(row.shared_columns());
        if let Some(root) = self.current.as_deref_mut() {
            attach_children(self.tree, &self.chains, &mut self.seen, root, &row)?;
        }

        Ok(completed)
    }

    /// Ends the stream, returning the last root under construction.
    pub fn finish(&mut self) -> Option<Box<dyn Node>> {
        self.previous = None;
        self.current.take()
    }
}

fn attach_children(
    tree: &RuleTree, chains: &[Vec<usize>], seen: &mut [HashSet<String>], root: &mut dyn Node,
    row: &Row,
) -> Result<()> {
    let rules = tree.rules();
    // composite signature of the instance each rule resolves to on this row
    let mut lineage: Vec<Option<String>> = vec![None; rules.len()];
    lineage[0] = Some(String::new());

    for (index, rule) in rules.iter().enumerate().skip(1) {
        let parent = tree.position(rule.parent_path()).unwrap_or(0);
        let scoped = row.scope(rule);
        let (Some(parent_sig), Some(signature)) = (lineage[parent].as_deref(), scoped.signature())
        else {
            continue;
        };
        let composite = format!("{parent_sig}{KEY_SEPARATOR}{KEY_SEPARATOR}{signature}");
        lineage[index] = Some(composite.clone());

        if !seen[index].insert(composite) {
            continue;
        }

        let Some(target) = resolve(tree, &chains[index], root)? else {
            warn!(path = rule.path(), "no instance to attach to; row skipped");
            continue;
        };
        let mut child = rule.create();
        rule.bind(child.as_mut(), &scoped)
            .map_err(|err| err.context(format!("binding '{}'", rule.path())))?;

        let relation = target
            .relation_mut(rule.segment(), rule.is_many())
            .ok_or_else(|| Error::config(rule.path(), "parent entity has no such relation"))?;
        relation.attach(child)?;
        trace!(path = rule.path(), "attached instance");
    }

    Ok(())
}

// Walks from the root to the entity that owns the last segment of `chain`.
fn resolve<'n>(
    tree: &RuleTree, chain: &[usize], root: &'n mut dyn Node,
) -> Result<Option<&'n mut dyn Node>> {
    let Some((_, ancestors)) = chain.split_last() else {
        return Ok(Some(root));
    };

    let mut node = root;
    for &index in ancestors {
        let rule = &tree.rules()[index];
        let relation = node
            .relation_mut(rule.segment(), rule.is_many())
            .ok_or_else(|| Error::config(rule.path(), "parent entity has no such relation"))?;
        match relation.current_mut() {
            Some(next) => node = next,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Runs `sql` and hands every completed root to `emit`, in stream order.
/// Returns the number of root boundaries observed.
pub(crate) fn run(
    accessor: &mut Accessor<'_>, tree: &RuleTree, sql: &str, params: &Params, page: Option<Page>,
    mut emit: impl FnMut(Box<dyn Node>) -> Result<()>,
) -> Result<usize> {
    let mut engine = Reconstructor::new(tree);
    if let Some(page) = page {
        engine = engine.with_page(page);
    }

    accessor.query(sql, params, &mut |record| {
        if let Some(root) = engine.push(record)? {
            emit(root)?;
        }
        Ok(())
    })?;
    if let Some(root) = engine.finish() {
        emit(root)?;
    }

    debug!(total = engine.total(), "fetch complete");
    Ok(engine.total())
}

/// Pull adapter reconstructing roots from a record iterator.
pub struct Fetch<'t, I> {
    records: I,
    engine: Reconstructor<'t>,
    done: bool,
}

impl<'t, I> Fetch<'t, I>
where
    I: Iterator<Item = anyhow::Result<Record>>,
{
    /// Wraps `records`.
    #[must_use]
    pub fn new(tree: &'t RuleTree, records: I) -> Self {
        Self {
            records,
            engine: Reconstructor::new(tree),
            done: false,
        }
    }

    /// Only materializes roots inside `page`.
    #[must_use]
    pub fn with_page(mut self, page: Page) -> Self {
        self.engine = self.engine.with_page(page);
        self
    }

    /// Root boundaries observed so far.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.engine.total()
    }
}

impl<I> Iterator for Fetch<'_, I>
where
    I: Iterator<Item = anyhow::Result<Record>>,
{
    type Item = Result<Box<dyn Node>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.records.next() {
                Some(Ok(record)) => match self.engine.push(record) {
                    Ok(Some(root)) => return Some(Ok(root)),
                    Ok(None) => {}
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err));
                    }
                },
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
                None => {
                    self.done = true;
                    return self.engine.finish().map(Ok);
                }
            }
        }
    }
}

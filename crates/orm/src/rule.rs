//! # Mapping rules
//!
//! A [`RuleTree`] is a flat, ordered list of [`Rule`]s, one per mapped
//! expression path. The root rule has the empty path; every other rule names
//! a dot-separated relation chain from the root (`lines`, `lines.product`).
//! Rules are declared parent-first and the tree is validated before any
//! fetch or save runs.

use std::fmt;

use anyhow::anyhow;
use indexmap::IndexMap;
use trellis_sql::DataType;

use crate::binder;
use crate::entity::Node;
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::FieldValue;

/// Constructs an empty entity for a rule.
pub type Factory = Box<dyn Fn() -> Box<dyn Node>>;

/// Binds a scoped row into a freshly created entity.
pub type BindFn = Box<dyn Fn(&mut dyn Node, &Row) -> anyhow::Result<()>>;

/// Produces the columns written for an entity.
pub type WriteFn = Box<dyn Fn(&dyn Node) -> anyhow::Result<IndexMap<String, DataType>>>;

/// Computes lock column values from an entity.
pub type LockFn = Box<dyn Fn(&dyn Node) -> anyhow::Result<Vec<DataType>>>;

/// Relation kind of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// The aggregate root.
    Root,
    /// One-to-one relation, attached by assignment.
    One,
    /// One-to-many relation, attached by appending.
    Many,
}

/// A column populated from an identifier generated at another path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationId {
    /// Column on this rule's rows.
    pub column: String,

    /// Expression path of the auto-id rule that supplies the value.
    pub source_path: String,
}

/// Optimistic concurrency columns.
///
/// `current` yields the values expected in the store and is matched in the
/// WHERE clause of updates and deletes; `next` yields the values written on
/// insert and update.
pub struct OptimisticLock {
    /// Lock column names.
    pub columns: Vec<String>,

    /// Values currently expected in the store.
    pub current: LockFn,

    /// Values to write.
    pub next: LockFn,
}

impl OptimisticLock {
    /// Creates a lock over `columns`.
    pub fn new<N: Into<String>>(
        columns: impl IntoIterator<Item = N>,
        current: impl Fn(&dyn Node) -> anyhow::Result<Vec<DataType>> + 'static,
        next: impl Fn(&dyn Node) -> anyhow::Result<Vec<DataType>> + 'static,
    ) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            current: Box::new(current),
            next: Box::new(next),
        }
    }

    /// Integer row-version lock on `column`: the stored value is expected,
    /// and the value plus one is written. A `NULL` version writes `1`.
    pub fn version(column: impl Into<String>) -> Self {
        let column = column.into();
        let read = column.clone();
        let bump = column.clone();

        Self::new(
            [column],
            move |node| Ok(vec![node.get_field(&read).unwrap_or_else(DataType::null)]),
            move |node| {
                let current = node.get_field(&bump).unwrap_or_else(DataType::null);
                let version = Option::<i64>::from_value(&current)?.unwrap_or(0);
                Ok(vec![DataType::Int64(Some(version + 1))])
            },
        )
    }
}

impl fmt::Debug for OptimisticLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticLock").field("columns", &self.columns).finish_non_exhaustive()
    }
}

/// Mapping rule for one expression path.
pub struct Rule {
    path: String,
    kind: RuleKind,
    unique_keys: Vec<String>,
    prefix: String,
    writable: bool,
    table: Option<String>,
    auto_id: bool,
    relation_id: Option<RelationId>,
    lock: Option<OptimisticLock>,
    factory: Factory,
    bind: Option<BindFn>,
    write: Option<WriteFn>,
    claimed: Vec<String>,
}

impl Rule {
    /// Creates a rule with an explicit factory.
    pub fn new(
        kind: RuleKind, path: impl Into<String>, factory: impl Fn() -> Box<dyn Node> + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            unique_keys: Vec::new(),
            prefix: String::new(),
            writable: false,
            table: None,
            auto_id: false,
            relation_id: None,
            lock: None,
            factory: Box::new(factory),
            bind: None,
            write: None,
            claimed: Vec::new(),
        }
    }

    /// Root rule constructing `T`.
    #[must_use]
    pub fn root<T: Node + Default>() -> Self {
        Self::new(RuleKind::Root, "", || Box::new(T::default()))
    }

    /// One-to-one rule at `path` constructing `T`.
    #[must_use]
    pub fn one<T: Node + Default>(path: impl Into<String>) -> Self {
        Self::new(RuleKind::One, path, || Box::new(T::default()))
    }

    /// One-to-many rule at `path` constructing `T`.
    #[must_use]
    pub fn many<T: Node + Default>(path: impl Into<String>) -> Self {
        Self::new(RuleKind::Many, path, || Box::new(T::default()))
    }

    /// Columns that identify a new instance at this level.
    #[must_use]
    pub fn keys<N: Into<String>>(mut self, keys: impl IntoIterator<Item = N>) -> Self {
        self.unique_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Column prefix used to tell this level's columns apart in a join.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Persists this level to `table`.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self.writable = true;
        self
    }

    /// Enables or disables persistence for this level.
    #[must_use]
    pub const fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Marks the primary key as generated by the store.
    #[must_use]
    pub const fn auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }

    /// Populates `column` from the identifier generated at `source_path`.
    #[must_use]
    pub fn relation_id(
        mut self, column: impl Into<String>, source_path: impl Into<String>,
    ) -> Self {
        self.relation_id = Some(RelationId {
            column: column.into(),
            source_path: source_path.into(),
        });
        self
    }

    /// Adds optimistic concurrency columns.
    #[must_use]
    pub fn lock(mut self, lock: OptimisticLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Replaces name-matched binding for fetched rows.
    #[must_use]
    pub fn bind_with(
        mut self, bind: impl Fn(&mut dyn Node, &Row) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.bind = Some(Box::new(bind));
        self
    }

    /// Replaces name-matched column extraction for written rows.
    #[must_use]
    pub fn write_with(
        mut self,
        write: impl Fn(&dyn Node) -> anyhow::Result<IndexMap<String, DataType>> + 'static,
    ) -> Self {
        self.write = Some(Box::new(write));
        self
    }

    /// Expression path; empty for the root.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Relation kind.
    #[must_use]
    pub const fn kind(&self) -> RuleKind {
        self.kind
    }

    /// `true` for one-to-many rules.
    #[must_use]
    pub fn is_many(&self) -> bool {
        self.kind == RuleKind::Many
    }

    /// `true` for the root rule.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == RuleKind::Root
    }

    /// Unique key columns, without prefix.
    #[must_use]
    pub fn unique_keys(&self) -> &[String] {
        &self.unique_keys
    }

    /// Column prefix.
    #[must_use]
    pub fn column_prefix(&self) -> &str {
        &self.prefix
    }

    /// `true` when this level is persisted.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Target table.
    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// `true` when the primary key is generated by the store.
    #[must_use]
    pub const fn is_auto_id(&self) -> bool {
        self.auto_id
    }

    /// Relation-id descriptor.
    #[must_use]
    pub const fn relation(&self) -> Option<&RelationId> {
        self.relation_id.as_ref()
    }

    /// Optimistic lock descriptor.
    #[must_use]
    pub const fn optimistic_lock(&self) -> Option<&OptimisticLock> {
        self.lock.as_ref()
    }

    /// Nesting depth: 0 for the root, one more per path segment.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.path.is_empty() { 0 } else { self.path.split('.').count() }
    }

    /// Path of the parent rule.
    #[must_use]
    pub fn parent_path(&self) -> &str {
        self.path.rsplit_once('.').map_or("", |(parent, _)| parent)
    }

    /// Relation property name on the parent entity.
    #[must_use]
    pub fn segment(&self) -> &str {
        self.path.rsplit_once('.').map_or(self.path.as_str(), |(_, last)| last)
    }

    /// Longer column prefixes declared by other rules of the tree; open
    /// entities leave those columns alone.
    pub(crate) fn claimed_prefixes(&self) -> &[String] {
        &self.claimed
    }

    /// Creates an empty entity.
    #[must_use]
    pub fn create(&self) -> Box<dyn Node> {
        (self.factory)()
    }

    /// Binds a row scoped to this rule into `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if a column cannot be converted to its field.
    pub fn bind(&self, node: &mut dyn Node, row: &Row) -> anyhow::Result<()> {
        match &self.bind {
            Some(bind) => bind(node, row),
            None => binder::bind_to(node, row),
        }
    }

    /// Columns written for `node`.
    ///
    /// # Errors
    ///
    /// Returns an error if a custom write callback fails.
    pub fn columns(&self, node: &dyn Node) -> anyhow::Result<IndexMap<String, DataType>> {
        match &self.write {
            Some(write) => write(node),
            None => Ok(binder::bind_from(node)),
        }
    }

    /// Lock values `(current, next)` for `node`, paired with their columns.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock function fails or yields the wrong number
    /// of values.
    #[allow(clippy::type_complexity)]
    pub fn lock_values(
        &self, node: &dyn Node,
    ) -> anyhow::Result<Option<(Vec<(String, DataType)>, Vec<(String, DataType)>)>> {
        let Some(lock) = &self.lock else {
            return Ok(None);
        };

        let current = (lock.current)(node)?;
        let next = (lock.next)(node)?;
        if current.len() != lock.columns.len() || next.len() != lock.columns.len() {
            return Err(anyhow!(
                "lock at '{}' declares {} columns but produced {} current and {} next values",
                self.path,
                lock.columns.len(),
                current.len(),
                next.len()
            ));
        }

        let pair = |values: Vec<DataType>| -> Vec<(String, DataType)> {
            lock.columns.iter().cloned().zip(values).collect()
        };
        Ok(Some((pair(current), pair(next))))
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("unique_keys", &self.unique_keys)
            .field("prefix", &self.prefix)
            .field("writable", &self.writable)
            .field("table", &self.table)
            .field("auto_id", &self.auto_id)
            .field("relation_id", &self.relation_id)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Ordered rule collection, root first.
#[derive(Debug)]
pub struct RuleTree {
    rules: Vec<Rule>,
}

impl RuleTree {
    /// Starts a tree from its root rule.
    #[must_use]
    pub fn new(root: Rule) -> Self {
        Self { rules: vec![root] }
    }

    /// Appends a rule. Parents must be added before their children.
    #[must_use]
    pub fn rule(mut self, mut rule: Rule) -> Self {
        for existing in &mut self.rules {
            claim(existing, &rule.prefix);
            claim(&mut rule, &existing.prefix);
        }
        self.rules.push(rule);
        self
    }

    /// The root rule.
    #[must_use]
    pub fn root(&self) -> &Rule {
        &self.rules[0]
    }

    /// Rules in nesting order, root first.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Looks up a rule by expression path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Rule> {
        self.position(path).map(|index| &self.rules[index])
    }

    /// Index of the rule at `path`.
    #[must_use]
    pub fn position(&self, path: &str) -> Option<usize> {
        self.rules.iter().position(|rule| rule.path.eq_ignore_ascii_case(path))
    }

    /// Indexes of the rules from depth one down to `index`, inclusive.
    pub(crate) fn chain(&self, index: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = index;
        while current != 0 {
            chain.push(current);
            current = self.position(self.rules[current].parent_path()).unwrap_or(0);
        }
        chain.reverse();
        chain
    }

    /// Checks the tree before first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending rule.
    pub fn validate(&self) -> Result<()> {
        let root = self.root();
        if !root.is_root() || !root.path.is_empty() {
            return Err(Error::config(&root.path, "the first rule must be an unnamed root"));
        }
        validate_storage(root)?;

        for (index, rule) in self.rules.iter().enumerate().skip(1) {
            let path = rule.path.as_str();
            if rule.is_root() {
                return Err(Error::config(path, "only the first rule may be a root"));
            }
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(Error::config(path, "expression path has an empty segment"));
            }
            if self.rules[..index].iter().any(|earlier| earlier.path.eq_ignore_ascii_case(path)) {
                return Err(Error::config(path, "duplicate expression path"));
            }
            if rule.unique_keys.is_empty() {
                return Err(Error::config(path, "non-root rules must declare unique keys"));
            }

            let previous = &self.rules[index - 1];
            if rule.depth() > previous.depth() + 1 {
                return Err(Error::config(path, "nesting depth skips a level"));
            }
            let Some(parent) = self.rules[..index]
                .iter()
                .find(|earlier| earlier.path.eq_ignore_ascii_case(rule.parent_path()))
            else {
                return Err(Error::config(path, "parent rule must be declared first"));
            };
            let probe = parent.create();
            if !probe.is_open() && probe.relation(rule.segment()).is_none() {
                return Err(Error::config(
                    path,
                    format!("parent entity has no relation '{}'", rule.segment()),
                ));
            }

            validate_storage(rule)?;
            if let Some(relation) = &rule.relation_id {
                let source = self.rules[..index]
                    .iter()
                    .find(|earlier| earlier.path.eq_ignore_ascii_case(&relation.source_path));
                match source {
                    Some(source) if source.auto_id => {}
                    Some(_) => {
                        return Err(Error::config(
                            path,
                            format!("relation id source '{}' is not auto-id", relation.source_path),
                        ));
                    }
                    None => {
                        return Err(Error::config(
                            path,
                            format!(
                                "relation id source '{}' must be declared first",
                                relation.source_path
                            ),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

// Records `prefix` on `rule` when it narrows the rule's own prefix.
fn claim(rule: &mut Rule, prefix: &str) {
    let own = rule.prefix.as_str();
    let narrows = prefix.len() > own.len()
        && prefix.get(..own.len()).is_some_and(|head| head.eq_ignore_ascii_case(own));
    if narrows && !rule.claimed.iter().any(|known| known.eq_ignore_ascii_case(prefix)) {
        rule.claimed.push(prefix.to_string());
    }
}

fn validate_storage(rule: &Rule) -> Result<()> {
    if rule.writable && rule.table.as_deref().is_none_or(str::is_empty) {
        return Err(Error::config(&rule.path, "writable rules must name a table"));
    }
    if rule.auto_id && !rule.writable {
        return Err(Error::config(&rule.path, "auto-id rules must be writable"));
    }
    if let Some(lock) = &rule.lock
        && lock.columns.is_empty()
    {
        return Err(Error::config(&rule.path, "optimistic lock declares no columns"));
    }
    Ok(())
}

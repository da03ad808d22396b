//! # Mapper
//!
//! Entry point pairing a validated [`RuleTree`] with the calls that use it.
//! The tree is checked once, when the mapper is built; every fetch and save
//! afterwards keeps its working state in per-call values.

use std::cell::RefCell;

use tracing::instrument;
use trellis_sql::{Connection, Params, TempTable};

use crate::accessor::{Accessor, KeyCache};
use crate::entity::{Node, downcast};
use crate::error::{Error, Result};
use crate::fetch::{self, Page, PageResult};
use crate::nest::{Nesting, renest};
use crate::rule::RuleTree;
use crate::save::{SaveStats, Saver};

/// Fetches and saves entity graphs described by one rule tree.
///
/// A mapper is cheap to keep around and is meant to be reused. It is not
/// `Sync`: share one per thread, or build one per connection.
///
/// ```ignore
/// let mapper = Mapper::new(
///     RuleTree::new(Rule::root::<Order>().keys(["id"]).table("orders").auto_id())
///         .rule(Rule::many::<Line>("lines").keys(["id"]).prefix("line_").table("lines")),
/// )?
/// .with_key_query(ORDER_BY_ID);
///
/// let orders: Vec<Order> = mapper.fetch(&mut conn, ORDERS, &Params::new())?;
/// ```
#[derive(Debug)]
pub struct Mapper {
    tree: RuleTree,
    key_query: Option<String>,
    keys: RefCell<KeyCache>,
}

impl Mapper {
    /// Validates `tree` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the tree is invalid.
    pub fn new(tree: RuleTree) -> Result<Self> {
        tree.validate()?;
        Ok(Self {
            tree,
            key_query: None,
            keys: RefCell::new(KeyCache::new()),
        })
    }

    /// Query loading the persisted graph of one root for [`Mapper::update`].
    /// It receives the root's primary-key values as parameters named after
    /// the key columns, e.g. `@id`.
    #[must_use]
    pub fn with_key_query(mut self, sql: impl Into<String>) -> Self {
        self.key_query = Some(sql.into());
        self
    }

    /// Starts from a pre-populated primary-key cache.
    #[must_use]
    pub fn with_key_cache(mut self, keys: KeyCache) -> Self {
        self.keys = RefCell::new(keys);
        self
    }

    /// The validated rule tree.
    #[must_use]
    pub const fn tree(&self) -> &RuleTree {
        &self.tree
    }

    /// A copy of the primary-key cache.
    #[must_use]
    pub fn key_cache(&self) -> KeyCache {
        self.keys.try_borrow().map(|keys| keys.clone()).unwrap_or_default()
    }

    /// Runs `sql` and hands each root to `f` as soon as it is complete, so
    /// only one root is held in memory at a time. Returns the number of
    /// roots.
    ///
    /// # Errors
    ///
    /// Returns a query or binding error, or the first error `f` returns.
    #[instrument(skip_all, fields(sql = sql))]
    pub fn stream(
        &self, conn: &mut dyn Connection, sql: &str, params: &Params,
        f: impl FnMut(Box<dyn Node>) -> Result<()>,
    ) -> Result<usize> {
        self.with_keys(|keys| {
            let mut accessor = Accessor::new(conn, keys);
            fetch::run(&mut accessor, &self.tree, sql, params, None, f)
        })
    }

    /// Runs `sql` and returns every root.
    ///
    /// # Errors
    ///
    /// Returns a query or binding error, or an error if a root is not a `T`.
    #[instrument(skip_all, fields(sql = sql))]
    pub fn fetch<T: Node>(
        &self, conn: &mut dyn Connection, sql: &str, params: &Params,
    ) -> Result<Vec<T>> {
        let mut roots = Vec::new();
        self.with_keys(|keys| {
            let mut accessor = Accessor::new(conn, keys);
            fetch::run(&mut accessor, &self.tree, sql, params, None, |root| {
                roots.push(downcast::<T>(root)?);
                Ok(())
            })
        })?;
        Ok(roots)
    }

    /// Runs `sql` and returns its only root, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ambiguous`] when the query yields more than one root.
    pub fn fetch_one<T: Node>(
        &self, conn: &mut dyn Connection, sql: &str, params: &Params,
    ) -> Result<Option<T>> {
        let mut roots = self.fetch::<T>(conn, sql, params)?;
        match roots.len() {
            0 | 1 => Ok(roots.pop()),
            count => Err(Error::Ambiguous { count }),
        }
    }

    /// Runs `sql` and returns the roots inside `page` together with the
    /// number of roots in the whole result.
    ///
    /// # Errors
    ///
    /// Returns a query or binding error, or an error if a root is not a `T`.
    #[instrument(skip_all, fields(sql = sql, page = page.number, size = page.size))]
    pub fn fetch_page<T: Node>(
        &self, conn: &mut dyn Connection, sql: &str, params: &Params, page: Page,
    ) -> Result<PageResult<T>> {
        let mut items = Vec::new();
        let total = self.with_keys(|keys| {
            let mut accessor = Accessor::new(conn, keys);
            fetch::run(&mut accessor, &self.tree, sql, params, Some(page), |root| {
                items.push(downcast::<T>(root)?);
                Ok(())
            })
        })?;
        Ok(PageResult { items, total })
    }

    /// Runs `sql` and re-nests the roots into a forest.
    ///
    /// # Errors
    ///
    /// Returns a query error, or [`Error::Config`] when `T` lacks the child
    /// relation named by `nesting`.
    pub fn fetch_nested<T: Node>(
        &self, conn: &mut dyn Connection, sql: &str, params: &Params, nesting: &Nesting,
    ) -> Result<Vec<T>> {
        let mut roots = Vec::new();
        self.stream(conn, sql, params, |root| {
            roots.push(root);
            Ok(())
        })?;
        renest(roots, nesting)?
            .into_iter()
            .map(|root| downcast::<T>(root).map_err(Error::from))
            .collect()
    }

    /// Provisions `tables`, runs `sql` against them and drops them again,
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns a provisioning, query or drop error.
    #[instrument(skip_all, fields(sql = sql, tables = tables.len()))]
    pub fn fetch_with_temp_tables<T: Node>(
        &self, conn: &mut dyn Connection, tables: &[TempTable], sql: &str, params: &Params,
    ) -> Result<Vec<T>> {
        let mut roots = Vec::new();
        self.with_keys(|keys| {
            let mut accessor = Accessor::new(conn, keys);
            accessor.with_temp_tables(tables, |inner| {
                fetch::run(inner, &self.tree, sql, params, None, |root| {
                    roots.push(downcast::<T>(root)?);
                    Ok(())
                })
            })
        })?;
        Ok(roots)
    }

    /// Inserts the graph inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// See [`Saver::insert`].
    #[instrument(skip_all)]
    pub fn insert(&self, conn: &mut dyn Connection, root: &mut dyn Node) -> Result<SaveStats> {
        self.with_keys(|keys| Saver::new(&self.tree, Accessor::new(conn, keys)).insert(root))
    }

    /// Reconciles the graph with its persisted state inside the caller's
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no key query was configured; see
    /// [`Saver::update`] for the rest.
    #[instrument(skip_all)]
    pub fn update(&self, conn: &mut dyn Connection, root: &mut dyn Node) -> Result<SaveStats> {
        let Some(key_query) = self.key_query.as_deref() else {
            return Err(Error::config("", "updates need a key query"));
        };
        self.with_keys(|keys| {
            Saver::new(&self.tree, Accessor::new(conn, keys)).update(root, key_query)
        })
    }

    /// Deletes the graph inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// See [`Saver::delete`].
    #[instrument(skip_all)]
    pub fn delete(&self, conn: &mut dyn Connection, root: &dyn Node) -> Result<SaveStats> {
        self.with_keys(|keys| Saver::new(&self.tree, Accessor::new(conn, keys)).delete(root))
    }

    // A call made from inside a `stream` callback finds the cache borrowed
    // and works with a private one.
    fn with_keys<T>(&self, f: impl FnOnce(&mut KeyCache) -> Result<T>) -> Result<T> {
        let mut private = KeyCache::new();
        let mut shared = self.keys.try_borrow_mut().ok();
        let keys = match shared.as_deref_mut() {
            Some(keys) => keys,
            None => &mut private,
        };
        f(keys)
    }
}

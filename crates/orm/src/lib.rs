//! # Trellis ORM
//!
//! Rule-driven mapping between flat, joined result sets and nested entity
//! graphs, and back.
//!
//! A [`RuleTree`] declares one [`Rule`] per expression path: the root, and
//! every one-to-one or one-to-many relation below it, each with the unique
//! key columns that mark a new instance in the row stream. Fetching walks
//! the stream once, detecting instance boundaries per rule and attaching
//! children to the most recent instance of their parent. Saving flattens a
//! graph into per-table rows and writes them inside the caller's
//! transaction, with optimistic locking, generated-identifier capture and
//! identity-keyed reconciliation on update.
//!
//! # Quick Start
//!
//! ## Declare entities
//!
//! ```ignore
//! use trellis_orm::entity;
//!
//! entity! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Line {
//!         pub id: Option<i64>,
//!         pub order_id: Option<i64>,
//!         pub sku: String,
//!         pub qty: i64,
//!     }
//! }
//!
//! entity! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Order {
//!         pub id: Option<i64>,
//!         pub customer: String,
//!         pub version: Option<i64>,
//!     }
//!     relations {
//!         pub lines: many Line,
//!     }
//! }
//! ```
//!
//! ## Describe the mapping
//!
//! ```ignore
//! use trellis_orm::{Mapper, OptimisticLock, Rule, RuleTree};
//!
//! let mapper = Mapper::new(
//!     RuleTree::new(
//!         Rule::root::<Order>()
//!             .keys(["id"])
//!             .table("orders")
//!             .auto_id()
//!             .lock(OptimisticLock::version("version")),
//!     )
//!     .rule(
//!         Rule::many::<Line>("lines")
//!             .keys(["id"])
//!             .prefix("line_")
//!             .table("lines")
//!             .auto_id()
//!             .relation_id("order_id", ""),
//!     ),
//! )?
//! .with_key_query(ORDER_WITH_LINES_BY_ID);
//! ```
//!
//! ## Fetch and save
//!
//! ```ignore
//! let mut orders: Vec<Order> = mapper.fetch(&mut conn, ORDERS_WITH_LINES, &Params::new())?;
//!
//! conn.begin()?;
//! orders[0].lines.remove(0);
//! match mapper.update(&mut conn, &mut orders[0]) {
//!     Ok(_) => conn.commit()?,
//!     Err(err) if err.is_conflict() => conn.rollback()?, // re-fetch and retry
//!     Err(err) => return Err(err.into()),
//! }
//! ```
//!
//! Rule trees without a typed shape use [`MapEntity`], an ordered map that
//! grows relation slots on demand.

#![forbid(unsafe_code)]

mod accessor;
mod binder;
mod entity;
mod error;
mod fetch;
mod map;
mod mapper;
mod nest;
mod row;
mod rule;
mod save;
mod value;

pub use accessor::{Accessor, KeyCache, ParamFilter, seed_entities};
pub use binder::{bind_from, bind_to};
pub use entity::{Entity, FieldAccessor, Node, Relation, downcast};
pub use error::{Error, Result};
pub use fetch::{Fetch, Page, PageResult, Reconstructor};
pub use map::{MapEntity, Slot};
pub use mapper::Mapper;
pub use nest::{Nesting, renest, renest_typed};
pub use row::{Boundary, Row};
pub use rule::{
    BindFn, Factory, LockFn, OptimisticLock, RelationId, Rule, RuleKind, RuleTree, WriteFn,
};
pub use save::{SaveStats, Saver, write_rows};
pub use value::FieldValue;

// Re-exports for `entity!` expansions.
#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use trellis_sql::DataType;

    pub use crate::entity::{__field_names, __get_field, __set_field};
}

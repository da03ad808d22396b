//! Common test helpers shared across integration tests.
#![allow(dead_code)]

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};
use trellis_orm::{Mapper, OptimisticLock, Rule, RuleTree, entity};
use trellis_sql::SqliteConnection;

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Product {
        pub sku: String,
        pub name: String,
    }
}

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Line {
        pub id: Option<i64>,
        pub order_id: Option<i64>,
        pub sku: String,
        pub qty: i64,
        pub version: Option<i64>,
    }
    relations {
        pub product: one Product,
    }
}

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Order {
        pub id: Option<i64>,
        pub customer: String,
        pub version: Option<i64>,
    }
    relations {
        pub lines: many Line,
    }
}

pub const SCHEMA: &str = "
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        customer TEXT NOT NULL,
        version INTEGER NOT NULL
    );
    CREATE TABLE lines (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_id INTEGER NOT NULL REFERENCES orders (id),
        sku TEXT NOT NULL,
        qty INTEGER NOT NULL,
        version INTEGER NOT NULL
    );
    CREATE TABLE products (sku TEXT PRIMARY KEY, name TEXT NOT NULL);
    INSERT INTO products (sku, name) VALUES ('A', 'anchor'), ('B', 'bracket'), ('C', 'clamp');
";

pub const SELECT: &str = "
    SELECT o.id, o.customer, o.version,
           l.id AS line_id, l.order_id AS line_order_id, l.sku AS line_sku,
           l.qty AS line_qty, l.version AS line_version,
           p.sku AS product_sku, p.name AS product_name
    FROM orders o
    LEFT JOIN lines l ON l.order_id = o.id
    LEFT JOIN products p ON p.sku = l.sku";

/// Every order with its lines, in key order.
pub fn orders_query() -> String {
    format!("{SELECT} ORDER BY o.id, l.id")
}

/// One order by `@id`.
pub fn order_by_id() -> String {
    format!("{SELECT} WHERE o.id = @id ORDER BY o.id, l.id")
}

pub fn init_tracing() {
    let _ = Registry::default().with(EnvFilter::new("debug")).with(fmt::layer()).try_init();
}

pub fn connection() -> SqliteConnection {
    init_tracing();
    let conn = SqliteConnection::open_in_memory().expect("open database");
    conn.execute_batch(SCHEMA).expect("create schema");
    conn
}

pub fn order_tree() -> RuleTree {
    RuleTree::new(
        Rule::root::<Order>()
            .keys(["id"])
            .table("orders")
            .auto_id()
            .lock(OptimisticLock::version("version")),
    )
    .rule(
        Rule::many::<Line>("lines")
            .keys(["id"])
            .prefix("line_")
            .table("lines")
            .auto_id()
            .relation_id("order_id", "")
            .lock(OptimisticLock::version("version")),
    )
    .rule(Rule::one::<Product>("lines.product").keys(["sku"]).prefix("product_"))
}

pub fn order_mapper() -> Mapper {
    Mapper::new(order_tree()).expect("valid tree").with_key_query(order_by_id())
}

/// A new, unsaved order with one line per `(sku, qty)`.
pub fn order(customer: &str, lines: &[(&str, i64)]) -> Order {
    Order {
        customer: customer.to_string(),
        lines: lines
            .iter()
            .map(|(sku, qty)| Line {
                sku: (*sku).to_string(),
                qty: *qty,
                ..Line::default()
            })
            .collect(),
        ..Order::default()
    }
}

/// Inserts `order` in its own transaction and returns it with generated
/// values filled in.
pub fn insert(conn: &mut SqliteConnection, mapper: &Mapper, mut order: Order) -> Order {
    conn.begin().expect("begin");
    mapper.insert(conn, &mut order).expect("insert");
    conn.commit().expect("commit");
    order
}

/// Fetches the persisted state of one order.
pub fn reload(conn: &mut SqliteConnection, mapper: &Mapper, id: i64) -> Option<Order> {
    let params = trellis_sql::Params::new().set("id", id);
    mapper.fetch_one(conn, &order_by_id(), &params).expect("fetch")
}

/// Attaches the catalogue products a fetch would find for each line.
pub fn with_products(mut order: Order) -> Order {
    for line in &mut order.lines {
        line.product = match line.sku.as_str() {
            "A" => Some(Box::new(product("A", "anchor"))),
            "B" => Some(Box::new(product("B", "bracket"))),
            "C" => Some(Box::new(product("C", "clamp"))),
            _ => None,
        };
    }
    order
}

fn product(sku: &str, name: &str) -> Product {
    Product {
        sku: sku.to_string(),
        name: name.to_string(),
    }
}

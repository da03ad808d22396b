//! Integration tests writing entity graphs to `SQLite` inside caller-owned
//! transactions.

#![allow(missing_docs)]

mod common;

use common::{
    Line, SELECT, connection, insert, order, order_by_id, order_mapper, order_tree, reload,
};
use trellis_orm::{Error, MapEntity, Mapper, Node, OptimisticLock, Rule, RuleTree, SaveStats};
use trellis_sql::{Connection, DataType, Params};

fn line(sku: &str, qty: i64) -> Line {
    Line {
        sku: sku.to_string(),
        qty,
        ..Line::default()
    }
}

fn count(conn: &mut dyn Connection, sql: &str) -> usize {
    conn.query_all(sql, &[]).unwrap().len()
}

#[test]
fn insert_propagates_generated_ids() {
    let mut conn = connection();
    let mapper = order_mapper();

    let first = insert(&mut conn, &mapper, order("ada", &[("A", 1), ("B", 2)]));
    let second = insert(&mut conn, &mapper, order("bob", &[("C", 3)]));

    assert_eq!(first.id, Some(1));
    assert_eq!(first.version, Some(1));
    assert!(first.lines.iter().all(|l| l.order_id == Some(1) && l.version == Some(1)));
    assert_eq!(first.lines.iter().map(|l| l.id).collect::<Vec<_>>(), [Some(1), Some(2)]);
    assert_eq!(second.lines[0].order_id, Some(2));

    let stored = conn.query_all("SELECT order_id FROM lines ORDER BY id", &[]).unwrap();
    let owners: Vec<_> = stored.iter().map(|r| r.get("order_id").cloned()).collect();
    let owner = |id: i64| Some(DataType::from(id));
    assert_eq!(owners, [owner(1), owner(1), owner(2)]);
}

#[test]
fn insert_reports_statements() {
    let mut conn = connection();
    let mapper = order_mapper();
    let mut graph = order("ada", &[("A", 1), ("B", 2)]);

    conn.begin().unwrap();
    let stats = mapper.insert(&mut conn, &mut graph).unwrap();
    conn.commit().unwrap();

    assert_eq!(
        stats,
        SaveStats {
            inserted: 3,
            ..SaveStats::default()
        }
    );
}

#[test]
fn update_reconciles_children_by_identity() {
    let mut conn = connection();
    let mapper = order_mapper();
    let saved = insert(&mut conn, &mapper, order("ada", &[("A", 1), ("B", 1), ("C", 1)]));
    let id = saved.id.unwrap();

    let mut desired = reload(&mut conn, &mapper, id).unwrap();
    desired.lines.remove(0);
    desired.lines[0].qty = 5;
    desired.lines.push(line("A", 7));

    conn.begin().unwrap();
    let stats = mapper.update(&mut conn, &mut desired).unwrap();
    conn.commit().unwrap();

    assert_eq!(
        stats,
        SaveStats {
            inserted: 1,
            updated: 2,
            deleted: 1,
            unchanged: 1,
        }
    );
    assert_eq!(desired.version, Some(2));
    assert_eq!(desired.lines[2].id, Some(4));
    assert_eq!(desired.lines[2].order_id, Some(id));

    let stored = reload(&mut conn, &mapper, id).unwrap();
    let lines: Vec<(&str, i64, Option<i64>)> =
        stored.lines.iter().map(|l| (l.sku.as_str(), l.qty, l.version)).collect();
    assert_eq!(lines, [("B", 5, Some(2)), ("C", 1, Some(1)), ("A", 7, Some(1))]);
    assert_eq!(stored.version, Some(2));
}

#[test]
fn unchanged_graph_only_touches_the_root() {
    let mut conn = connection();
    let mapper = order_mapper();
    let saved = insert(&mut conn, &mapper, order("ada", &[("A", 1), ("B", 1)]));
    let mut desired = reload(&mut conn, &mapper, saved.id.unwrap()).unwrap();

    conn.begin().unwrap();
    let stats = mapper.update(&mut conn, &mut desired).unwrap();
    conn.commit().unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(stats.inserted + stats.deleted, 0);
}

#[test]
fn stale_update_conflicts() {
    let mut conn = connection();
    let mapper = order_mapper();
    let saved = insert(&mut conn, &mapper, order("ada", &[("A", 1)]));
    let id = saved.id.unwrap();
    let mut first = reload(&mut conn, &mapper, id).unwrap();
    let mut second = first.clone();

    first.customer = "ada lovelace".to_string();
    conn.begin().unwrap();
    mapper.update(&mut conn, &mut first).unwrap();
    conn.commit().unwrap();

    second.customer = "countess".to_string();
    conn.begin().unwrap();
    let err = mapper.update(&mut conn, &mut second).unwrap_err();
    conn.rollback().unwrap();

    assert!(err.is_conflict(), "{err}");
    let stored = reload(&mut conn, &mapper, id).unwrap();
    assert_eq!(stored.customer, "ada lovelace");
    assert_eq!(stored.version, Some(2));
}

#[test]
fn delete_removes_children_first() {
    let mut conn = connection();
    let mapper = order_mapper();
    let keep = insert(&mut conn, &mapper, order("ada", &[("A", 1)]));
    let gone = insert(&mut conn, &mapper, order("bob", &[("B", 1), ("C", 1)]));

    conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
    conn.begin().unwrap();
    let stats = mapper.delete(&mut conn, &gone).unwrap();
    conn.commit().unwrap();

    assert_eq!(stats.deleted, 3);
    assert!(reload(&mut conn, &mapper, gone.id.unwrap()).is_none());
    assert!(reload(&mut conn, &mapper, keep.id.unwrap()).is_some());
    assert_eq!(count(&mut conn, "SELECT id FROM lines"), 1);
}

#[test]
fn stale_delete_conflicts() {
    let mut conn = connection();
    let mapper = order_mapper();
    let saved = insert(&mut conn, &mapper, order("ada", &[]));
    let mut newer = reload(&mut conn, &mapper, saved.id.unwrap()).unwrap();

    conn.begin().unwrap();
    mapper.update(&mut conn, &mut newer).unwrap();
    conn.commit().unwrap();

    conn.begin().unwrap();
    let err = mapper.delete(&mut conn, &saved).unwrap_err();
    conn.rollback().unwrap();

    assert!(matches!(err, Error::Conflict { ref table, .. } if table == "orders"));
}

#[test]
fn writes_need_a_transaction() {
    let mut conn = connection();
    let mapper = order_mapper();
    let mut graph = order("ada", &[("A", 1)]);

    let err = mapper.insert(&mut conn, &mut graph).unwrap_err();

    assert!(matches!(err, Error::NoTransaction));
    assert_eq!(count(&mut conn, "SELECT id FROM orders"), 0);
}

#[test]
fn update_of_missing_root_is_not_found() {
    let mut conn = connection();
    let mapper = order_mapper();
    let mut ghost = order("ghost", &[]);
    ghost.id = Some(42);
    ghost.version = Some(1);

    conn.begin().unwrap();
    let err = mapper.update(&mut conn, &mut ghost).unwrap_err();
    conn.rollback().unwrap();

    assert!(matches!(err, Error::NotFound));
}

#[test]
fn key_query_returning_many_roots_is_ambiguous() {
    let mut conn = connection();
    let mapper = Mapper::new(order_tree()).unwrap().with_key_query(common::orders_query());
    insert(&mut conn, &mapper, order("ada", &[]));
    let mut second = insert(&mut conn, &mapper, order("bob", &[]));

    conn.begin().unwrap();
    let err = mapper.update(&mut conn, &mut second).unwrap_err();
    conn.rollback().unwrap();

    assert!(matches!(err, Error::Ambiguous { count: 2 }));
}

#[test]
fn missing_relation_source_is_reported() {
    let mut conn = connection();
    conn.execute_batch(
        "CREATE TABLE invoices (id INTEGER PRIMARY KEY AUTOINCREMENT, total INTEGER NOT NULL)",
    )
    .unwrap();
    let mapper = Mapper::new(
        RuleTree::new(Rule::root::<MapEntity>().keys(["id"]).table("orders").auto_id())
            .rule(Rule::one::<MapEntity>("invoice").keys(["id"]).table("invoices").auto_id())
            .rule(
                Rule::many::<MapEntity>("lines")
                    .keys(["id"])
                    .prefix("line_")
                    .table("lines")
                    .auto_id()
                    .relation_id("order_id", "invoice"),
            ),
    )
    .unwrap();

    let mut graph = MapEntity::new();
    graph.set("customer", "ada");
    graph.set("version", 1_i64);
    let line =
        MapEntity::from_pairs([("sku", DataType::from("A")), ("qty", DataType::from(1_i64))]);
    graph.relation_mut("lines", true).unwrap().attach(Box::new(line)).unwrap();

    conn.begin().unwrap();
    let err = mapper.insert(&mut conn, &mut graph).unwrap_err();
    conn.rollback().unwrap();

    assert!(
        matches!(err, Error::Relation { ref path, ref source_path, .. }
            if path == "lines" && source_path == "invoice"),
        "{err}"
    );
}

#[test]
fn open_entities_receive_generated_values() {
    let mut conn = connection();
    let mapper = Mapper::new(
        RuleTree::new(Rule::root::<MapEntity>().keys(["id"]).table("orders").auto_id()).rule(
            Rule::many::<MapEntity>("lines")
                .keys(["id"])
                .prefix("line_")
                .table("lines")
                .auto_id()
                .relation_id("order_id", ""),
        ),
    )
    .unwrap();

    let mut graph = MapEntity::new();
    graph.set("customer", "ada");
    graph.set("version", 1_i64);
    let line = MapEntity::from_pairs([
        ("sku", DataType::from("B")),
        ("qty", DataType::from(2_i64)),
        ("version", DataType::from(1_i64)),
    ]);
    graph.relation_mut("lines", true).unwrap().attach(Box::new(line)).unwrap();

    conn.begin().unwrap();
    mapper.insert(&mut conn, &mut graph).unwrap();
    conn.commit().unwrap();

    assert_eq!(graph.get("id"), Some(&DataType::from(1_i64)));
    let saved = &graph.many("lines")[0];
    assert_eq!(saved.get("id"), Some(&DataType::from(1_i64)));
    assert_eq!(saved.get("order_id"), Some(&DataType::from(1_i64)));
}

#[test]
fn fetched_map_graph_saves_back() {
    let mut conn = connection();
    let saved = insert(&mut conn, &order_mapper(), order("ada", &[("A", 1), ("B", 2)]));
    let id = saved.id.unwrap();
    let mapper = Mapper::new(
        RuleTree::new(
            Rule::root::<MapEntity>()
                .keys(["id"])
                .table("orders")
                .auto_id()
                .lock(OptimisticLock::version("version")),
        )
        .rule(
            Rule::many::<MapEntity>("lines")
                .keys(["id"])
                .prefix("line_")
                .table("lines")
                .auto_id()
                .relation_id("order_id", "")
                .lock(OptimisticLock::version("version")),
        )
        .rule(Rule::one::<MapEntity>("lines.product").keys(["sku"]).prefix("product_")),
    )
    .unwrap()
    .with_key_query(order_by_id());

    let params = Params::new().set("id", id);
    let mut graph: MapEntity =
        mapper.fetch_one(&mut conn, &order_by_id(), &params).unwrap().unwrap();
    assert_eq!(graph.field_names(), ["id", "customer", "version"]);
    graph.set("customer", "ada lovelace");

    conn.begin().unwrap();
    let stats = mapper.update(&mut conn, &mut graph).unwrap();
    conn.commit().unwrap();

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.unchanged, 2);
    assert_eq!(graph.get("version"), Some(&DataType::from(2_i64)));
    let stored = reload(&mut conn, &order_mapper(), id).unwrap();
    assert_eq!(stored.customer, "ada lovelace");
    assert_eq!(stored.lines.len(), 2);
}

#[test]
fn key_query_finding_another_root_is_a_mismatch() {
    let mut conn = connection();
    let mapper = Mapper::new(order_tree())
        .unwrap()
        .with_key_query(format!("{SELECT} WHERE o.id = 1 AND @id = @id ORDER BY o.id, l.id"));
    insert(&mut conn, &mapper, order("ada", &[("A", 1)]));
    let mut second = insert(&mut conn, &mapper, order("bob", &[("B", 1)]));
    second.customer = "robert".to_string();

    conn.begin().unwrap();
    let err = mapper.update(&mut conn, &mut second).unwrap_err();
    conn.rollback().unwrap();

    assert!(
        matches!(err, Error::IdentityMismatch { ref current, ref desired }
            if current == "[1]" && desired == "[2]"),
        "{err}"
    );
    assert_eq!(reload(&mut conn, &order_mapper(), 2).unwrap().customer, "bob");
}

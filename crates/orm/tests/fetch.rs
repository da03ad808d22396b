//! Integration tests reconstructing entity graphs from joined `SQLite`
//! result sets.

#![allow(missing_docs)]

mod common;

use common::{Order, SELECT, connection, insert, order, order_mapper, orders_query, with_products};
use trellis_orm::{
    Fetch, MapEntity, Mapper, Nesting, Page, Rule, RuleTree, downcast, entity, seed_entities,
};
use trellis_sql::{Connection, DataType, Params, TempTable};

entity! {
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

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Wanted {
        pub id: i64,
    }
}

#[test]
fn one_root_per_distinct_key() {
    let mut conn = connection();
    let mapper = order_mapper();
    insert(&mut conn, &mapper, order("ada", &[("A", 1), ("B", 2)]));
    insert(&mut conn, &mapper, order("bob", &[]));
    insert(&mut conn, &mapper, order("cy", &[("C", 3)]));

    let orders: Vec<Order> = mapper.fetch(&mut conn, &orders_query(), &Params::new()).unwrap();

    let customers: Vec<&str> = orders.iter().map(|o| o.customer.as_str()).collect();
    assert_eq!(customers, ["ada", "bob", "cy"]);
    let lines: Vec<usize> = orders.iter().map(|o| o.lines.len()).collect();
    assert_eq!(lines, [2, 0, 1]);
    assert_eq!(orders[0].lines[1].product.as_ref().unwrap().name, "bracket");
}

#[test]
fn inserted_graph_round_trips() {
    let mut conn = connection();
    let mapper = order_mapper();
    let saved = insert(&mut conn, &mapper, order("ada", &[("A", 1), ("C", 4)]));

    let fetched: Vec<Order> = mapper.fetch(&mut conn, &orders_query(), &Params::new()).unwrap();

    assert_eq!(fetched, vec![with_products(saved)]);
}

#[test]
fn refetch_is_stable() {
    let mut conn = connection();
    let mapper = order_mapper();
    insert(&mut conn, &mapper, order("ada", &[("A", 1), ("B", 2)]));
    insert(&mut conn, &mapper, order("bob", &[("C", 3)]));

    let first: Vec<Order> = mapper.fetch(&mut conn, &orders_query(), &Params::new()).unwrap();
    let second: Vec<Order> = mapper.fetch(&mut conn, &orders_query(), &Params::new()).unwrap();

    assert_eq!(first, second);
}

#[test]
fn streams_roots_one_at_a_time() {
    let mut conn = connection();
    let mapper = order_mapper();
    for customer in ["ada", "bob", "cy"] {
        insert(&mut conn, &mapper, order(customer, &[("A", 1), ("B", 1)]));
    }

    let mut seen = Vec::new();
    let count = mapper
        .stream(&mut conn, &orders_query(), &Params::new(), |root| {
            let order = downcast::<Order>(root)?;
            assert_eq!(order.lines.len(), 2);
            seen.push(order.customer);
            Ok(())
        })
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(seen, ["ada", "bob", "cy"]);
}

#[test]
fn iterator_over_records() {
    let mut conn = connection();
    let mapper = order_mapper();
    insert(&mut conn, &mapper, order("ada", &[("A", 1)]));
    insert(&mut conn, &mapper, order("bob", &[("B", 1), ("C", 1)]));

    let records = conn.query_all(&orders_query(), &[]).unwrap();
    let mut fetch = Fetch::new(mapper.tree(), records.into_iter().map(Ok));
    let orders: Vec<Order> =
        fetch.by_ref().map(|root| downcast::<Order>(root.unwrap()).unwrap()).collect();

    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].lines.len(), 2);
    assert_eq!(fetch.total(), 2);
}

#[test]
fn pages_window_the_roots() {
    let mut conn = connection();
    let mapper = order_mapper();
    for customer in ["a", "b", "c", "d", "e"] {
        insert(&mut conn, &mapper, order(customer, &[("A", 1), ("B", 1)]));
    }
    let mut page = |number| {
        mapper
            .fetch_page::<Order>(&mut conn, &orders_query(), &Params::new(), Page::new(number, 2))
            .unwrap()
    };

    let second = page(2);
    assert_eq!(second.total, 5);
    let customers: Vec<&str> = second.items.iter().map(|o| o.customer.as_str()).collect();
    assert_eq!(customers, ["c", "d"]);
    assert!(second.items.iter().all(|o| o.lines.len() == 2));

    let third = page(3);
    assert_eq!(third.items.len(), 1);
    assert_eq!(third.total, 5);

    let past = page(4);
    assert!(past.items.is_empty());
    assert_eq!(past.total, 5);
}

#[test]
fn flat_categories_nest_into_a_forest() {
    let mut conn = connection();
    conn.execute_batch(
        "CREATE TABLE categories (id INTEGER PRIMARY KEY, parent_id INTEGER, name TEXT NOT NULL);
         INSERT INTO categories (id, parent_id, name) VALUES
             (1, NULL, 'tools'), (2, 1, 'hand tools'), (3, 2, 'hammers'),
             (4, NULL, 'garden'), (5, 1, 'power tools'), (6, 99, 'orphans');",
    )
    .unwrap();
    let mapper = Mapper::new(RuleTree::new(Rule::root::<Category>().keys(["id"]))).unwrap();

    let forest: Vec<Category> = mapper
        .fetch_nested(
            &mut conn,
            "SELECT id, parent_id, name FROM categories ORDER BY id",
            &Params::new(),
            &Nesting::new("id", "parent_id", "children"),
        )
        .unwrap();

    let roots: Vec<&str> = forest.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(roots, ["tools", "garden", "orphans"]);
    let tools: Vec<&str> = forest[0].children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(tools, ["hand tools", "power tools"]);
    assert_eq!(forest[0].children[0].children[0].name, "hammers");
}

#[test]
fn map_entities_grow_relations_and_serialize() {
    let mut conn = connection();
    insert(&mut conn, &order_mapper(), order("ada", &[("A", 2)]));
    let mapper = Mapper::new(
        RuleTree::new(Rule::root::<MapEntity>().keys(["id"]).prefix("o_"))
            .rule(Rule::many::<MapEntity>("lines").keys(["id"]).prefix("l_")),
    )
    .unwrap();

    let orders: Vec<MapEntity> = mapper
        .fetch(
            &mut conn,
            "SELECT o.id AS o_id, o.customer AS o_customer, l.id AS l_id, l.sku AS l_sku
             FROM orders o JOIN lines l ON l.order_id = o.id ORDER BY o.id, l.id",
            &Params::new(),
        )
        .unwrap();

    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].get("CUSTOMER"), Some(&DataType::from("ada")));
    assert_eq!(
        orders[0].to_json(),
        serde_json::json!({
            "id": 1,
            "customer": "ada",
            "lines": [{ "id": 1, "sku": "A" }],
        })
    );
}

#[test]
fn temp_tables_scope_the_query() {
    let mut conn = connection();
    let mapper = order_mapper();
    for customer in ["ada", "bob", "cy"] {
        insert(&mut conn, &mapper, order(customer, &[("A", 1)]));
    }
    let wanted = seed_entities(
        TempTable::new("wanted", "id INTEGER NOT NULL").index(["id"]),
        &[Wanted { id: 1 }, Wanted { id: 3 }],
    );

    let orders: Vec<Order> = mapper
        .fetch_with_temp_tables(
            &mut conn,
            &[wanted],
            &format!("{SELECT} JOIN wanted w ON w.id = o.id ORDER BY o.id, l.id"),
            &Params::new(),
        )
        .unwrap();

    let customers: Vec<&str> = orders.iter().map(|o| o.customer.as_str()).collect();
    assert_eq!(customers, ["ada", "cy"]);
    let left = conn
        .query_all("SELECT name FROM sqlite_temp_master WHERE name = 'wanted'", &[])
        .unwrap();
    assert!(left.is_empty());
}

#[test]
fn list_parameters_expand() {
    let mut conn = connection();
    let mapper = order_mapper();
    for customer in ["ada", "bob", "cy"] {
        insert(&mut conn, &mapper, order(customer, &[]));
    }

    let orders: Vec<Order> = mapper
        .fetch(
            &mut conn,
            &format!("{SELECT} WHERE o.customer IN (@names) ORDER BY o.id, l.id"),
            &Params::new().list("names", ["bob", "cy", "dee"]),
        )
        .unwrap();

    assert_eq!(orders.len(), 2);
}

#[test]
fn shared_child_attaches_under_each_parent() {
    let mut conn = connection();
    let mapper = order_mapper();
    insert(&mut conn, &mapper, order("ada", &[("A", 1), ("A", 5)]));

    let orders: Vec<Order> = mapper.fetch(&mut conn, &orders_query(), &Params::new()).unwrap();

    let products: Vec<&str> = orders[0]
        .lines
        .iter()
        .map(|line| line.product.as_ref().map_or("", |p| p.name.as_str()))
        .collect();
    assert_eq!(products, ["anchor", "anchor"]);
}

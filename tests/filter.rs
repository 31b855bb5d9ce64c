use trellis::condition::property;
use trellis::error::TrellisError;
use trellis::graph::{GraphConnection, Persistence};
use trellis::props;
use trellis::query::ResultItem;
use trellis::value::Value;

/// Two people and fifty things: everything belongs to the rich person, the
/// first ten things also belong to the poor one.
fn ownership_graph() -> GraphConnection {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();
    let person1 = graph
        .add_node(
            "person",
            &props! {"net_worth" => 1000, "name" => "John McGregor"},
        )
        .unwrap();
    let person2 = graph
        .add_node(
            "person",
            &props! {"net_worth" => 10000, "name" => "Sir Richard Stiltington"},
        )
        .unwrap();
    for i in 0..50 {
        let thing = graph
            .add_node(
                "thing",
                &props! {
                    "price" => (i as f64) * 10.0,
                    "value" => (50 - i) as f64,
                },
            )
            .unwrap();
        graph.add_edge("owns", &person2, &thing, &props! {}).unwrap();
        if i < 10 {
            graph.add_edge("owns", &person1, &thing, &props! {}).unwrap();
        }
    }
    graph
}

fn values(rows: &[Vec<ResultItem>], cell: usize) -> Vec<Value> {
    rows.iter()
        .map(|row| match &row[cell] {
            ResultItem::Value(value) => value.clone(),
            other => panic!("expected a value cell, found {:?}", other),
        })
        .collect()
}

#[test]
fn filter_on_a_single_property() {
    let graph = ownership_graph();
    let rows = graph
        .query_node("thing")
        .unwrap()
        .return_this()
        .unwrap()
        .filter(property("value").gt(25.0))
        .unwrap()
        .return_property(&["value"])
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 25);
    for value in values(&rows, 1) {
        match value {
            Value::Float(v) => assert!(v > 25.0),
            other => panic!("expected a float, found {:?}", other),
        }
    }
}

#[test]
fn filter_then_traverse_then_project() {
    let graph = ownership_graph();
    let rows = graph
        .query_node("person")
        .unwrap()
        .filter(property("net_worth").lt(5000))
        .unwrap()
        .follow(Some("owns"))
        .unwrap()
        .return_property(&["price"])
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 10);
    for value in values(&rows, 0) {
        match value {
            Value::Float(v) => assert!(v < 100.0),
            other => panic!("expected a float, found {:?}", other),
        }
    }
}

#[test]
fn filter_with_a_compound_condition() {
    let graph = ownership_graph();
    let rows = graph
        .query_node("thing")
        .unwrap()
        .filter(property("value").gt(25.0).and(property("price").gt(100)))
        .unwrap()
        .return_property(&["value", "price"])
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 14);
    for row in &rows {
        let (value, price) = match (&row[0], &row[1]) {
            (ResultItem::Value(Value::Float(v)), ResultItem::Value(Value::Float(p))) => (*v, *p),
            other => panic!("expected two floats, found {:?}", other),
        };
        assert!(value > 25.0);
        assert!(price > 100.0);
    }
}

#[test]
fn filter_does_not_return_values() {
    let graph = ownership_graph();
    let rows = graph
        .query_node("thing")
        .unwrap()
        .filter(property("value").gt(25.0))
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 25);
    for row in &rows {
        assert_eq!(row.len(), 1);
        assert!(matches!(row[0], ResultItem::Node(_)));
    }
}

#[test]
fn filter_excludes_entities_missing_the_property() {
    let graph = ownership_graph();
    let pauper = graph.add_node("person", &props! {}).unwrap();
    // a null comparison is null, never true, so the pauper is excluded both
    // from the filter and from its negation
    let rows = graph
        .query_node("person")
        .unwrap()
        .filter(property("net_worth").lt(5000))
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 1);
    let rows = graph
        .query_node("person")
        .unwrap()
        .filter(property("net_worth").lt(5000).not())
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows
        .iter()
        .any(|row| row[0] == ResultItem::Node(pauper.clone())));
}

#[test]
fn filter_on_an_unknown_property_matches_nothing() {
    let graph = ownership_graph();
    let rows = graph
        .query_node("person")
        .unwrap()
        .filter(property("shoe_size").gt(0))
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(rows.len(), 0);
}

#[test]
fn negated_filter_keeps_the_complement() {
    let graph = ownership_graph();
    let kept = graph
        .query_node("thing")
        .unwrap()
        .filter(property("value").gt(25.0))
        .unwrap()
        .count()
        .unwrap();
    let complement = graph
        .query_node("thing")
        .unwrap()
        .filter(property("value").gt(25.0).not())
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(kept, 25);
    assert_eq!(complement, 25);
}

#[test]
fn filter_with_arithmetic() {
    let graph = ownership_graph();
    // price / 10 < 5 keeps the five cheapest things
    let count = graph
        .query_node("thing")
        .unwrap()
        .filter((property("price") / 10.0).lt(5.0))
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(count, 5);
}

#[test]
fn filter_compares_two_properties() {
    let graph = ownership_graph();
    // price = 10 i, value = 50 - i, so price > value from i = 5 onward
    let count = graph
        .query_node("thing")
        .unwrap()
        .filter(property("price").gt(property("value")))
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(count, 45);
}

#[test]
fn bound_reference_filters_a_chained_branch() {
    let graph = ownership_graph();
    let projected = graph
        .query_node("thing")
        .unwrap()
        .return_property(&["price"])
        .unwrap();
    let price = projected.property_ref("price").unwrap();
    let rows = projected.filter(price.ge(400.0)).unwrap().all().unwrap();
    // the carried price column is still returned by the projection link
    assert_eq!(rows.len(), 10);
    for value in values(&rows, 1) {
        match value {
            Value::Float(v) => assert!(v >= 400.0),
            other => panic!("expected a float, found {:?}", other),
        }
    }
}

#[test]
fn bound_reference_combines_with_fresh_properties() {
    let graph = ownership_graph();
    let projected = graph
        .query_node("thing")
        .unwrap()
        .return_property(&["price"])
        .unwrap();
    let price = projected.property_ref("price").unwrap();
    let count = projected
        .filter(price.gt(property("value")))
        .unwrap()
        .count()
        .unwrap();
    assert_eq!(count, 45);
}

#[test]
fn property_ref_on_a_non_projection_is_a_structure_error() {
    let graph = ownership_graph();
    let query = graph.query_node("thing").unwrap();
    assert!(matches!(
        query.property_ref("price"),
        Err(TrellisError::Structure(_))
    ));
    let projected = query.return_property(&["price"]).unwrap();
    assert!(matches!(
        projected.property_ref("value"),
        Err(TrellisError::Structure(_))
    ));
}

#[test]
fn count_matches_all_for_filtered_chains() {
    let graph = ownership_graph();
    let count = graph
        .query_node("person")
        .unwrap()
        .filter(property("net_worth").lt(5000))
        .unwrap()
        .follow(Some("owns"))
        .unwrap()
        .return_property(&["price"])
        .unwrap()
        .count()
        .unwrap();
    let len = graph
        .query_node("person")
        .unwrap()
        .filter(property("net_worth").lt(5000))
        .unwrap()
        .follow(Some("owns"))
        .unwrap()
        .return_property(&["price"])
        .unwrap()
        .all()
        .unwrap()
        .len();
    assert_eq!(count as usize, len);
}

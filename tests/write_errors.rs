use trellis::condition::property;
use trellis::error::TrellisError;
use trellis::graph::{GraphConnection, Persistence};
use trellis::props;

#[test]
fn mismatched_node_property_lists_fail_before_writing() {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();
    let result = graph.add_nodes("person", 3, Some(&[props! {"age" => 20}]));
    assert!(matches!(result, Err(TrellisError::Cardinality(_))));
    // surfaced before any insert
    assert_eq!(graph.query_node("person").unwrap().count().unwrap(), 0);
}

#[test]
fn mismatched_edge_property_lists_fail_before_writing() {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();
    let a = graph.add_node("endpoint", &props! {}).unwrap();
    let b = graph.add_node("endpoint", &props! {}).unwrap();
    let result = graph.add_edges(
        "link",
        &[(a.id(), b.id()), (b.id(), a.id())],
        Some(&[props! {"weight" => 1}]),
    );
    assert!(matches!(result, Err(TrellisError::Cardinality(_))));
    assert_eq!(graph.query_edge("link").unwrap().count().unwrap(), 0);
}

#[test]
fn bound_reference_in_an_unrelated_chain_is_a_structure_error() {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();
    graph.add_node("thing", &props! {"price" => 1.0}).unwrap();
    graph.add_node("person", &props! {}).unwrap();
    let projected = graph
        .query_node("thing")
        .unwrap()
        .return_property(&["price"])
        .unwrap();
    let price = projected.property_ref("price").unwrap();
    // a chain that never staged the projected column cannot bind it
    let result = graph.query_node("person").unwrap().filter(price);
    assert!(matches!(result, Err(TrellisError::Structure(_))));
}

#[test]
fn empty_results_are_not_errors() {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();
    graph.add_node("person", &props! {}).unwrap();
    let rows = graph
        .query_node("person")
        .unwrap()
        .filter(property("age").gt(1))
        .unwrap()
        .all()
        .unwrap();
    assert!(rows.is_empty());
    assert_eq!(
        graph
            .query_node("person")
            .unwrap()
            .follow(None)
            .unwrap()
            .first()
            .unwrap(),
        None
    );
}

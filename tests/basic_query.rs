use std::collections::BTreeMap;

use trellis::graph::{GraphConnection, Persistence};
use trellis::props;
use trellis::query::{ResultItem, ResultRow};
use trellis::store::Node;
use trellis::value::Value;

struct Fixture {
    graph: GraphConnection,
    sim: Node,
    ts1: Node,
    ts2: Node,
    halo: Node,
    halo2: Node,
    boring: Node,
    boring2: Node,
    multi: Node,
    ts1_props: BTreeMap<String, Value>,
    ts2_props: BTreeMap<String, Value>,
}

fn setup() -> Fixture {
    let graph = GraphConnection::open(Persistence::InMemory).unwrap();

    let sim = graph.add_node("simulation", &props! {}).unwrap();
    let ts1 = graph
        .add_node(
            "timestep",
            &props! {
                "timestep_name" => "ts1",
                "dummy_property_1" => "dp1 for ts1",
                "dummy_property_2" => "dp2 for ts1",
            },
        )
        .unwrap();
    let halo = graph.add_node("halo", &props! {"halo_number" => 2}).unwrap();
    let ts2 = graph
        .add_node(
            "timestep",
            &props! {
                "timestep_name" => "ts2",
                "dummy_property_1" => "dp1 for ts2",
            },
        )
        .unwrap();
    let halo2 = graph.add_node("halo", &props! {"halo_number" => 3}).unwrap();

    graph
        .add_edge("has_timestep", &sim, &ts1, &props! {"test_property" => 1})
        .unwrap();
    graph
        .add_edge("has_halo", &ts1, &halo, &props! {"test_property" => 2})
        .unwrap();
    graph
        .add_edge("has_timestep", &sim, &ts2, &props! {"test_property" => 3})
        .unwrap();
    graph
        .add_edge("has_halo", &ts2, &halo2, &props! {"test_property" => 4})
        .unwrap();
    graph
        .add_edge(
            "is_successor",
            &halo,
            &halo2,
            &props! {"test_property" => 5, "comment" => "test comment"},
        )
        .unwrap();

    let boring = graph.add_node("boring", &props! {}).unwrap();
    let boring2 = graph.add_node("boring", &props! {}).unwrap();
    let multi = graph
        .add_node(
            "multipropertynode",
            &props! {"property1" => 1, "property2" => "two"},
        )
        .unwrap();

    let ts1_props = BTreeMap::from([
        (String::from("timestep_name"), Value::from("ts1")),
        (String::from("dummy_property_1"), Value::from("dp1 for ts1")),
        (String::from("dummy_property_2"), Value::from("dp2 for ts1")),
    ]);
    let ts2_props = BTreeMap::from([
        (String::from("timestep_name"), Value::from("ts2")),
        (String::from("dummy_property_1"), Value::from("dp1 for ts2")),
    ]);

    Fixture {
        graph,
        sim,
        ts1,
        ts2,
        halo,
        halo2,
        boring,
        boring2,
        multi,
        ts1_props,
        ts2_props,
    }
}

fn node_row(node: &Node) -> ResultRow {
    vec![ResultItem::Node(node.clone())]
}

#[test]
fn query_node_by_category() {
    let f = setup();
    assert_eq!(
        f.graph.query_node("simulation").unwrap().all().unwrap(),
        vec![node_row(&f.sim)]
    );
    assert_eq!(
        f.graph.query_node("halo").unwrap().all().unwrap(),
        vec![node_row(&f.halo), node_row(&f.halo2)]
    );
}

#[test]
fn query_node_unknown_category_matches_nothing() {
    let f = setup();
    // resolving for a read never creates the category
    assert_eq!(
        f.graph.query_node("does_not_exist").unwrap().all().unwrap(),
        Vec::<ResultRow>::new()
    );
    assert_eq!(
        f.graph.query_node("does_not_exist").unwrap().count().unwrap(),
        0
    );
}

#[test]
fn follow_by_category() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .follow(Some("has_halo"))
            .unwrap()
            .all()
            .unwrap(),
        vec![node_row(&f.halo), node_row(&f.halo2)]
    );
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .follow(Some("has_halo"))
            .unwrap()
            .follow(Some("is_successor"))
            .unwrap()
            .all()
            .unwrap(),
        vec![node_row(&f.halo2)]
    );
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .follow(Some("has_halo"))
            .unwrap()
            .follow(Some("has_timestep"))
            .unwrap()
            .all()
            .unwrap(),
        Vec::<ResultRow>::new()
    );
}

#[test]
fn follow_without_category() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .follow(None)
            .unwrap()
            .follow(None)
            .unwrap()
            .all()
            .unwrap(),
        vec![node_row(&f.halo2)]
    );
}

#[test]
fn return_property() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_property(&["timestep_name"])
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![ResultItem::Value(Value::from("ts1"))],
            vec![ResultItem::Value(Value::from("ts2"))],
        ]
    );
}

#[test]
fn return_properties() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_properties()
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![ResultItem::Properties(f.ts1_props.clone())],
            vec![ResultItem::Properties(f.ts2_props.clone())],
        ]
    );
}

#[test]
fn return_this() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_this()
            .unwrap()
            .all()
            .unwrap(),
        vec![node_row(&f.ts1), node_row(&f.ts2)]
    );
}

#[test]
fn return_this_and_property() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_this()
            .unwrap()
            .return_property(&["timestep_name"])
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![
                ResultItem::Node(f.ts1.clone()),
                ResultItem::Value(Value::from("ts1")),
            ],
            vec![
                ResultItem::Node(f.ts2.clone()),
                ResultItem::Value(Value::from("ts2")),
            ],
        ]
    );
}

#[test]
fn return_this_and_properties() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_this()
            .unwrap()
            .return_properties()
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![
                ResultItem::Node(f.ts1.clone()),
                ResultItem::Properties(f.ts1_props.clone()),
            ],
            vec![
                ResultItem::Node(f.ts2.clone()),
                ResultItem::Properties(f.ts2_props.clone()),
            ],
        ]
    );
}

#[test]
fn return_property_without_results() {
    let f = setup();
    // the name exists as a category, but no timestep holds it as a property
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_this()
            .unwrap()
            .return_property(&["has_halo"])
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![ResultItem::Node(f.ts1.clone()), ResultItem::Null],
            vec![ResultItem::Node(f.ts2.clone()), ResultItem::Null],
        ]
    );
    assert_eq!(
        f.graph
            .query_node("timestep")
            .unwrap()
            .return_property(&["has_halo"])
            .unwrap()
            .all()
            .unwrap(),
        vec![vec![ResultItem::Null], vec![ResultItem::Null]]
    );
    // no properties at all on these nodes
    assert_eq!(
        f.graph
            .query_node("boring")
            .unwrap()
            .return_this()
            .unwrap()
            .return_property(&["has_halo"])
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![ResultItem::Node(f.boring.clone()), ResultItem::Null],
            vec![ResultItem::Node(f.boring2.clone()), ResultItem::Null],
        ]
    );
}

#[test]
fn return_properties_without_results() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("boring")
            .unwrap()
            .return_this()
            .unwrap()
            .return_properties()
            .unwrap()
            .all()
            .unwrap(),
        vec![
            vec![
                ResultItem::Node(f.boring.clone()),
                ResultItem::Properties(BTreeMap::new()),
            ],
            vec![
                ResultItem::Node(f.boring2.clone()),
                ResultItem::Properties(BTreeMap::new()),
            ],
        ]
    );
}

#[test]
fn return_property_multiple_names() {
    let f = setup();
    assert_eq!(
        f.graph
            .query_node("multipropertynode")
            .unwrap()
            .return_this()
            .unwrap()
            .return_property(&["property2", "property1"])
            .unwrap()
            .all()
            .unwrap(),
        vec![vec![
            ResultItem::Node(f.multi.clone()),
            ResultItem::Value(Value::from("two")),
            ResultItem::Value(Value::from(1)),
        ]]
    );
}

#[test]
fn first_returns_one_row_or_nothing() {
    let f = setup();
    assert_eq!(
        f.graph.query_node("timestep").unwrap().first().unwrap(),
        Some(node_row(&f.ts1))
    );
    assert_eq!(
        f.graph.query_node("does_not_exist").unwrap().first().unwrap(),
        None
    );
}

#[test]
fn count_matches_all_everywhere() {
    let f = setup();
    let chains: Vec<(i64, usize)> = vec![
        (
            f.graph.query_node("timestep").unwrap().count().unwrap(),
            f.graph.query_node("timestep").unwrap().all().unwrap().len(),
        ),
        (
            f.graph
                .query_node("timestep")
                .unwrap()
                .follow(None)
                .unwrap()
                .count()
                .unwrap(),
            f.graph
                .query_node("timestep")
                .unwrap()
                .follow(None)
                .unwrap()
                .all()
                .unwrap()
                .len(),
        ),
        (
            f.graph
                .query_node("timestep")
                .unwrap()
                .return_properties()
                .unwrap()
                .count()
                .unwrap(),
            f.graph
                .query_node("timestep")
                .unwrap()
                .return_properties()
                .unwrap()
                .all()
                .unwrap()
                .len(),
        ),
    ];
    for (count, len) in chains {
        assert_eq!(count as usize, len);
    }
}

#[test]
fn rerunning_a_chain_reproduces_results() {
    let f = setup();
    let mut query = f
        .graph
        .query_node("timestep")
        .unwrap()
        .return_this()
        .unwrap()
        .return_property(&["timestep_name"])
        .unwrap();
    let once = query.all().unwrap();
    let again = query.all().unwrap();
    assert_eq!(once, again);
}

#[test]
fn result_rows_serialize() {
    let f = setup();
    let rows = f
        .graph
        .query_node("timestep")
        .unwrap()
        .return_property(&["timestep_name"])
        .unwrap()
        .all()
        .unwrap();
    let json = serde_json::to_value(&rows).unwrap();
    assert!(json.is_array());
}

//! Trellis – a property-graph query layer over a relational backing store.
//!
//! Trellis stores nodes, edges and their typed key/value properties in
//! SQLite and lets callers build multi-step graph traversals as a chain of
//! composable query objects:
//! * A [`store::Category`] interns a name into a stable integer id; entity
//!   kinds and property keys are both categories.
//! * A [`store::Node`] / [`store::Edge`] is a categorized entity; edges
//!   connect a source node to a destination node.
//! * A property row attaches a [`value::FlexibleValue`] (integer, float or
//!   text, stored as three mutually exclusive nullable slots) to a node or
//!   edge under a category.
//!
//! Each link in a query chain materializes its intermediate result set into
//! an ephemeral staging table (see [`stage::StagingSchema`]), so that a
//! multi-hop traversal becomes a sequence of relational inserts and joins
//! rather than recursive in-process graph walking. Filters are expressed
//! with the lazy [`condition`] algebra, which compiles to backing-store
//! predicates once its property references are bound to staging columns.
//!
//! ## Modules
//! * [`graph`] – The connection: schema bootstrap, category cache, writers
//!   and the query entry points.
//! * [`query`] – The chain algebra: scans, traversals, pivots, projections,
//!   filters, persistent re-references and the terminal operations.
//! * [`stage`] – Staging-table schema management and reification.
//! * [`condition`] – The filter expression algebra.
//! * [`value`] – Property values and their three-slot persisted form.
//! * [`store`] – Permanent tables and entity row types.
//! * [`error`] – The crate-wide error enum and result alias.
//!
//! ## Quick Start
//! ```
//! use trellis::graph::{GraphConnection, Persistence};
//! use trellis::condition::property;
//! use trellis::props;
//!
//! let graph = GraphConnection::open(Persistence::InMemory).unwrap();
//! let alice = graph.add_node("person", &props! {"net_worth" => 1000}).unwrap();
//! let hat = graph.add_node("thing", &props! {"price" => 10.0}).unwrap();
//! graph.add_edge("owns", &alice, &hat, &props! {}).unwrap();
//!
//! let rows = graph
//!     .query_node("person").unwrap()
//!     .filter(property("net_worth").lt(5000)).unwrap()
//!     .follow(Some("owns")).unwrap()
//!     .return_property(&["price"]).unwrap()
//!     .all()
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```
//!
//! ## Execution model
//! Building a chain performs no I/O. A terminal operation enters the chain
//! from the outermost link inward, creating and populating one staging table
//! per link, reads results back through a single outer-joined query against
//! the outermost staging table, and tears the staging tables down again as
//! it unwinds. Staging tables never outlive the call; re-running a chain
//! against unchanged data reproduces identical results.

pub mod condition;
pub mod error;
pub mod graph;
pub mod query;
pub mod stage;
pub mod store;
pub mod value;

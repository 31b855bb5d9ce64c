// used for persistence
use rusqlite::Connection;
use serde::Serialize;

use crate::error::Result;
use crate::value::FlexibleValue;

// Permanent table names, referenced by the staging and query layers when
// they compose insert-from-select and reification statements.
pub const CATEGORIES_TABLE: &str = "categories";
pub const NODES_TABLE: &str = "nodes";
pub const EDGES_TABLE: &str = "edges";
pub const NODE_PROPERTIES_TABLE: &str = "node_properties";
pub const EDGE_PROPERTIES_TABLE: &str = "edge_properties";

/// Create the permanent graph tables and their supporting indexes.
/// Idempotent, so reopening an existing database is harmless.
pub fn create_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        create table if not exists categories (
            id integer not null,
            name text not null,
            constraint referenceable_category_id primary key (
                id
            ),
            constraint unique_category_name unique (
                name
            )
        );
        create table if not exists nodes (
            id integer not null,
            category_id integer not null,
            constraint referenceable_node_id primary key (
                id
            ),
            constraint node_is_categorized foreign key (
                category_id
            ) references categories(id)
        );
        create table if not exists edges (
            id integer not null,
            category_id integer not null,
            from_node_id integer not null,
            to_node_id integer not null,
            constraint referenceable_edge_id primary key (
                id
            ),
            constraint edge_is_categorized foreign key (
                category_id
            ) references categories(id),
            constraint edge_comes_from_node foreign key (
                from_node_id
            ) references nodes(id),
            constraint edge_goes_to_node foreign key (
                to_node_id
            ) references nodes(id)
        );
        create table if not exists node_properties (
            id integer not null,
            node_id integer not null,
            category_id integer not null,
            value_int integer null,
            value_float real null,
            value_str text null,
            constraint referenceable_node_property_id primary key (
                id
            ),
            constraint node_property_belongs_to_node foreign key (
                node_id
            ) references nodes(id),
            constraint node_property_is_categorized foreign key (
                category_id
            ) references categories(id)
        );
        create table if not exists edge_properties (
            id integer not null,
            edge_id integer not null,
            category_id integer not null,
            value_int integer null,
            value_float real null,
            value_str text null,
            constraint referenceable_edge_property_id primary key (
                id
            ),
            constraint edge_property_belongs_to_edge foreign key (
                edge_id
            ) references edges(id),
            constraint edge_property_is_categorized foreign key (
                category_id
            ) references categories(id)
        );
        create index if not exists edges_from_index on edges(from_node_id);
        create index if not exists edges_to_index on edges(to_node_id);
        create index if not exists node_properties_owner_index on node_properties(node_id);
        create index if not exists edge_properties_owner_index on edge_properties(edge_id);
        ",
    )?;
    Ok(())
}

// ------------- Category -------------
/// An interned name shared by entity kinds and property keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    id: i64,
    name: String,
}
impl Category {
    pub fn new(id: i64, name: String) -> Self {
        Self { id, name }
    }
    pub fn id(&self) -> i64 {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ------------- Node -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    id: i64,
    category_id: i64,
}
impl Node {
    pub fn new(id: i64, category_id: i64) -> Self {
        Self { id, category_id }
    }
    pub fn id(&self) -> i64 {
        self.id
    }
    pub fn category_id(&self) -> i64 {
        self.category_id
    }
}

// ------------- Edge -------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    id: i64,
    category_id: i64,
    from_node_id: i64,
    to_node_id: i64,
}
impl Edge {
    pub fn new(id: i64, category_id: i64, from_node_id: i64, to_node_id: i64) -> Self {
        Self {
            id,
            category_id,
            from_node_id,
            to_node_id,
        }
    }
    pub fn id(&self) -> i64 {
        self.id
    }
    pub fn category_id(&self) -> i64 {
        self.category_id
    }
    pub fn from_node_id(&self) -> i64 {
        self.from_node_id
    }
    pub fn to_node_id(&self) -> i64 {
        self.to_node_id
    }
}

// ------------- Property -------------
/// A property row; node and edge properties are structurally identical,
/// differing only in which entity the owner id points at.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    id: i64,
    owner_id: i64,
    category_id: i64,
    value: FlexibleValue,
}
impl Property {
    pub fn new(id: i64, owner_id: i64, category_id: i64, value: FlexibleValue) -> Self {
        Self {
            id,
            owner_id,
            category_id,
            value,
        }
    }
    pub fn id(&self) -> i64 {
        self.id
    }
    pub fn owner_id(&self) -> i64 {
        self.owner_id
    }
    pub fn category_id(&self) -> i64 {
        self.category_id
    }
    pub fn value(&self) -> &FlexibleValue {
        &self.value
    }
}

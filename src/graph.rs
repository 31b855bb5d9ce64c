//! The graph connection: owns the backing-store connection and the category
//! cache, hands out query chains, and provides the write surface.

use bimap::BiHashMap;
use rusqlite::{Connection, params};
use seahash::SeaHasher;
use std::cell::RefCell;
use std::hash::BuildHasherDefault;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Result, TrellisError};
use crate::query::{EdgeQuery, NodeQuery, Query};
use crate::store::{self, Edge, Node};
use crate::value::{FlexibleValue, Value};

// we will use a fast hashing algo for maps whose keys are names or ids
pub type NameHasher = BuildHasherDefault<SeaHasher>;
pub type IdHasher = BuildHasherDefault<SeaHasher>;

/// Sentinel id a read-path category resolution yields for a name that does
/// not exist. Real ids start at 1, so the sentinel matches zero rows; reads
/// never create categories.
pub(crate) const MISSING_CATEGORY: i64 = -1;

/// Where the backing store lives.
pub enum Persistence {
    InMemory,
    File(PathBuf),
}

// ------------- CategoryCache -------------
/// Bidirectional name/id cache for the categories table, filled lazily on
/// first use. Owned by its connection; its lifetime is the connection's.
pub struct CategoryCache {
    kept: RefCell<Option<BiHashMap<String, i64, NameHasher, IdHasher>>>,
}

impl CategoryCache {
    fn new() -> Self {
        Self {
            kept: RefCell::new(None),
        }
    }

    fn fill(&self, connection: &Connection) -> Result<()> {
        if self.kept.borrow().is_some() {
            return Ok(());
        }
        let mut kept = BiHashMap::default();
        let mut statement =
            connection.prepare(&format!("select id, name from {}", store::CATEGORIES_TABLE))?;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            kept.insert(name, id);
        }
        *self.kept.borrow_mut() = Some(kept);
        Ok(())
    }

    /// Find-only resolution, used by readers. Never creates a category.
    pub fn find(&self, connection: &Connection, name: &str) -> Result<Option<i64>> {
        self.fill(connection)?;
        match self.kept.borrow().as_ref() {
            Some(kept) => Ok(kept.get_by_left(name).copied()),
            None => Ok(None),
        }
    }

    /// Find-or-create resolution, used by writers.
    pub fn intern(&self, connection: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.find(connection, name)? {
            return Ok(id);
        }
        connection.execute(
            &format!("insert into {} (name) values (?)", store::CATEGORIES_TABLE),
            params![name],
        )?;
        let id = connection.last_insert_rowid();
        debug!(name = %name, id = id, "interned category");
        if let Some(kept) = self.kept.borrow_mut().as_mut() {
            kept.insert(String::from(name), id);
        }
        Ok(id)
    }
}

// ------------- GraphConnection -------------
/// A connection to one property graph. Queries borrow the connection for
/// their whole chain; two chains must not execute concurrently on the same
/// connection.
pub struct GraphConnection {
    connection: Connection,
    categories: CategoryCache,
}

impl GraphConnection {
    pub fn open(persistence: Persistence) -> Result<Self> {
        let connection = match persistence {
            Persistence::InMemory => Connection::open_in_memory()?,
            Persistence::File(path) => Connection::open(path)?,
        };
        store::create_schema(&connection)?;
        Ok(Self {
            connection,
            categories: CategoryCache::new(),
        })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn category_cache(&self) -> &CategoryCache {
        &self.categories
    }

    /// Resolve a category name for reading: the sentinel id when unknown.
    pub(crate) fn reading_category_id(&self, name: &str) -> Result<i64> {
        Ok(self
            .categories
            .find(&self.connection, name)?
            .unwrap_or(MISSING_CATEGORY))
    }

    // ------------- queries -------------
    /// A query for all nodes of the given category.
    pub fn query_node(&self, category: &str) -> Result<NodeQuery<'_>> {
        Query::scan(self, category)
    }

    /// A query for all edges of the given category.
    pub fn query_edge(&self, category: &str) -> Result<EdgeQuery<'_>> {
        Query::scan(self, category)
    }

    // ------------- writers -------------
    /// Add one node of the given category, with its properties.
    pub fn add_node(&self, category: &str, properties: &[(&str, Value)]) -> Result<Node> {
        let transaction = self.connection.unchecked_transaction()?;
        let category_id = self.categories.intern(&self.connection, category)?;
        self.connection.execute(
            &format!(
                "insert into {} (category_id) values (?)",
                store::NODES_TABLE
            ),
            params![category_id],
        )?;
        let node_id = self.connection.last_insert_rowid();
        for (name, value) in properties {
            self.insert_property(
                store::NODE_PROPERTIES_TABLE,
                "node_id",
                node_id,
                name,
                value,
            )?;
        }
        transaction.commit()?;
        Ok(Node::new(node_id, category_id))
    }

    /// Add `number` nodes of the given category. When property lists are
    /// supplied there must be exactly one per node; the mismatch is detected
    /// before anything is written.
    pub fn add_nodes(
        &self,
        category: &str,
        number: usize,
        properties: Option<&[Vec<(&str, Value)>]>,
    ) -> Result<Vec<Node>> {
        if let Some(properties) = properties {
            if properties.len() != number {
                return Err(TrellisError::Cardinality(format!(
                    "{} property sets supplied for {} nodes",
                    properties.len(),
                    number
                )));
            }
        }
        let transaction = self.connection.unchecked_transaction()?;
        let category_id = self.categories.intern(&self.connection, category)?;
        let mut nodes = Vec::with_capacity(number);
        for index in 0..number {
            self.connection.execute(
                &format!(
                    "insert into {} (category_id) values (?)",
                    store::NODES_TABLE
                ),
                params![category_id],
            )?;
            let node_id = self.connection.last_insert_rowid();
            if let Some(properties) = properties {
                for (name, value) in &properties[index] {
                    self.insert_property(
                        store::NODE_PROPERTIES_TABLE,
                        "node_id",
                        node_id,
                        name,
                        value,
                    )?;
                }
            }
            nodes.push(Node::new(node_id, category_id));
        }
        transaction.commit()?;
        Ok(nodes)
    }

    /// Add one edge of the given category between two nodes.
    pub fn add_edge(
        &self,
        category: &str,
        from: &Node,
        to: &Node,
        properties: &[(&str, Value)],
    ) -> Result<Edge> {
        let transaction = self.connection.unchecked_transaction()?;
        let category_id = self.categories.intern(&self.connection, category)?;
        self.connection.execute(
            &format!(
                "insert into {} (category_id, from_node_id, to_node_id) values (?, ?, ?)",
                store::EDGES_TABLE
            ),
            params![category_id, from.id(), to.id()],
        )?;
        let edge_id = self.connection.last_insert_rowid();
        for (name, value) in properties {
            self.insert_property(
                store::EDGE_PROPERTIES_TABLE,
                "edge_id",
                edge_id,
                name,
                value,
            )?;
        }
        transaction.commit()?;
        Ok(Edge::new(edge_id, category_id, from.id(), to.id()))
    }

    /// Add one edge per `(from, to)` node-id pair, all of the given
    /// category. Property lists, when supplied, pair up with the edges.
    pub fn add_edges(
        &self,
        category: &str,
        pairs: &[(i64, i64)],
        properties: Option<&[Vec<(&str, Value)>]>,
    ) -> Result<Vec<Edge>> {
        if let Some(properties) = properties {
            if properties.len() != pairs.len() {
                return Err(TrellisError::Cardinality(format!(
                    "{} property sets supplied for {} edges",
                    properties.len(),
                    pairs.len()
                )));
            }
        }
        let transaction = self.connection.unchecked_transaction()?;
        let category_id = self.categories.intern(&self.connection, category)?;
        let mut edges = Vec::with_capacity(pairs.len());
        for (index, (from, to)) in pairs.iter().enumerate() {
            self.connection.execute(
                &format!(
                    "insert into {} (category_id, from_node_id, to_node_id) values (?, ?, ?)",
                    store::EDGES_TABLE
                ),
                params![category_id, from, to],
            )?;
            let edge_id = self.connection.last_insert_rowid();
            if let Some(properties) = properties {
                for (name, value) in &properties[index] {
                    self.insert_property(
                        store::EDGE_PROPERTIES_TABLE,
                        "edge_id",
                        edge_id,
                        name,
                        value,
                    )?;
                }
            }
            edges.push(Edge::new(edge_id, category_id, *from, *to));
        }
        transaction.commit()?;
        Ok(edges)
    }

    /// Set (insert or overwrite) a node property. Overwriting stores into
    /// exactly one value slot and nulls the other two.
    pub fn set_node_property(&self, node: &Node, name: &str, value: Value) -> Result<()> {
        self.set_property(
            store::NODE_PROPERTIES_TABLE,
            "node_id",
            node.id(),
            name,
            &value,
        )
    }

    /// Set (insert or overwrite) an edge property.
    pub fn set_edge_property(&self, edge: &Edge, name: &str, value: Value) -> Result<()> {
        self.set_property(
            store::EDGE_PROPERTIES_TABLE,
            "edge_id",
            edge.id(),
            name,
            &value,
        )
    }

    fn insert_property(
        &self,
        table: &str,
        owner_column: &str,
        owner_id: i64,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let category_id = self.categories.intern(&self.connection, name)?;
        let flexible = FlexibleValue::new(value.clone());
        let (value_int, value_float, value_str) = flexible.slots();
        self.connection.execute(
            &format!(
                "insert into {} ({}, category_id, value_int, value_float, value_str) \
                 values (?, ?, ?, ?, ?)",
                table, owner_column
            ),
            params![owner_id, category_id, value_int, value_float, value_str],
        )?;
        Ok(())
    }

    fn set_property(
        &self,
        table: &str,
        owner_column: &str,
        owner_id: i64,
        name: &str,
        value: &Value,
    ) -> Result<()> {
        let transaction = self.connection.unchecked_transaction()?;
        let category_id = self.categories.intern(&self.connection, name)?;
        let flexible = FlexibleValue::new(value.clone());
        let (value_int, value_float, value_str) = flexible.slots();
        let changed = self.connection.execute(
            &format!(
                "update {} set value_int = ?, value_float = ?, value_str = ? \
                 where {} = ? and category_id = ?",
                table, owner_column
            ),
            params![value_int, value_float, value_str, owner_id, category_id],
        )?;
        if changed == 0 {
            self.connection.execute(
                &format!(
                    "insert into {} ({}, category_id, value_int, value_float, value_str) \
                     values (?, ?, ?, ?, ?)",
                    table, owner_column
                ),
                params![owner_id, category_id, value_int, value_float, value_str],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }
}

/// Build a property list for the writer methods:
/// `props!{"name" => "Alice", "age" => 42}`.
#[macro_export]
macro_rules! props {
    () => {
        ::std::vec::Vec::<(&str, $crate::value::Value)>::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        ::std::vec![$(($name, $crate::value::Value::from($value))),+]
    };
}

//! The chain-of-queries algebra.
//!
//! Queries perform no I/O while they are being built; chaining only
//! constructs objects. When a terminal operation ([`Query::all`],
//! [`Query::first`] or [`Query::count`]) runs, the chain is entered from the
//! outermost link inward: each link first enters the base it was built from,
//! then activates its own staging table, populates it with an
//! insert-from-select against the backing store (joined against the base's
//! staging table where one exists), and applies link-local filtering.
//! Results are read back through a single reification query against the
//! outermost staging table, and the staging tables are torn down
//! innermost-active-first as the call stack unwinds.
//!
//! The algebra is generic over the entity kind: [`NodeQuery`] and
//! [`EdgeQuery`] are the same [`Query`] core instantiated with the [`Nodes`]
//! and [`Edges`] kind types, which only contribute table and column naming
//! plus the reification tag. The node/edge pivots live on the concrete
//! aliases since they swap the kind parameter.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use rusqlite::params_from_iter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::condition::{BindKey, Bindings, Condition};
use crate::error::{Result, TrellisError};
use crate::graph::{GraphConnection, IdHasher};
use crate::stage::{EntityTag, Reify, StagingSchema};
use crate::store::{Edge, Node};
use crate::value::{FlexibleValue, Value};

// ------------- EntityKind -------------
mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Nodes {}
    impl Sealed for super::Edges {}
}

/// The entity kind a query link positions on. Implemented by [`Nodes`] and
/// [`Edges`] only; the constants parameterize staging column naming and the
/// populate statements, so node and edge chains share one algebra.
pub trait EntityKind: sealed::Sealed + 'static {
    const TAG: EntityTag;
    /// Position column name when the link's current position is returned.
    const POSITION_COLUMN: &'static str;
    /// Position column name when the position is staging scaffolding only.
    const HIDDEN_POSITION_COLUMN: &'static str;
    /// Name root for persistent re-reference columns.
    const PERSISTENT_ROOT: &'static str;
    /// Name root for returned property-id columns.
    const PROPERTY_ROOT: &'static str;
    /// Name root for internal-only property-id columns.
    const HIDDEN_PROPERTY_ROOT: &'static str;
    /// Name root for all-properties owner-id columns.
    const PROPERTIES_ROOT: &'static str;
}

pub struct Nodes;
impl EntityKind for Nodes {
    const TAG: EntityTag = EntityTag::Node;
    const POSITION_COLUMN: &'static str = "node_id";
    const HIDDEN_POSITION_COLUMN: &'static str = "noreturn_node_id";
    const PERSISTENT_ROOT: &'static str = "node_id_persistent";
    const PROPERTY_ROOT: &'static str = "node_property_id";
    const HIDDEN_PROPERTY_ROOT: &'static str = "noreturn_node_property_id";
    const PROPERTIES_ROOT: &'static str = "node_properties_of";
}

pub struct Edges;
impl EntityKind for Edges {
    const TAG: EntityTag = EntityTag::Edge;
    const POSITION_COLUMN: &'static str = "edge_id";
    const HIDDEN_POSITION_COLUMN: &'static str = "noreturn_edge_id";
    const PERSISTENT_ROOT: &'static str = "edge_id_persistent";
    const PROPERTY_ROOT: &'static str = "edge_property_id";
    const HIDDEN_PROPERTY_ROOT: &'static str = "noreturn_edge_property_id";
    const PROPERTIES_ROOT: &'static str = "edge_properties_of";
}

// ------------- results -------------
/// One cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResultItem {
    /// A null staged id reified to nothing, or a property no entity holds.
    Null,
    Node(Node),
    Edge(Edge),
    Value(Value),
    Properties(BTreeMap<String, Value>),
}

pub type ResultRow = Vec<ResultItem>;

// ------------- links -------------
/// What populates a link's staging table. Category ids are resolved once at
/// construction time, with find-only semantics: an unknown name holds the
/// sentinel id and matches zero rows.
#[derive(Debug)]
enum Link {
    Scan {
        category: i64,
    },
    Follow {
        category: Option<i64>,
    },
    /// Node-to-edge pivot: edges whose source is the staged node.
    EdgesFrom {
        category: Option<i64>,
    },
    /// Edge-to-node pivot: the staged edge's destination node.
    TargetNode,
    /// One property-id column per requested name, one-to-one with the base.
    NamedProperties {
        categories: Vec<i64>,
        columns: Vec<String>,
    },
    /// Re-stages the base position as an owner id resolved to a full
    /// name-to-value map at read-back.
    AllProperties {
        column: String,
    },
    /// Deletes staged rows whose joined property values fail the condition.
    Filter {
        condition: Condition,
        names: Vec<String>,
        categories: Vec<i64>,
        columns: Vec<String>,
    },
    /// Re-stages the base position under a fresh name so the entity survives
    /// further hops; fetched only at read-back.
    Persist {
        column: String,
    },
}

#[derive(Debug, Clone)]
struct CarryColumn {
    name: String,
    reify: Reify,
}

/// Object-safe view of a chain link, so a query can hold a base of either
/// entity kind.
trait ChainLink {
    fn enter(&mut self) -> Result<()>;
    fn exit(&mut self);
    fn schema(&self) -> &StagingSchema;
    fn position_column(&self) -> &str;
    fn carried_columns(&self) -> Vec<CarryColumn>;
}

// ------------- Query -------------
/// One link in a query chain. See the module documentation for the
/// execution model.
pub struct Query<'g, K: EntityKind> {
    graph: &'g GraphConnection,
    schema: StagingSchema,
    base: Option<Box<dyn ChainLink + 'g>>,
    link: Link,
    position: String,
    /// Columns copied verbatim from the base's staging table.
    carry: Vec<CarryColumn>,
    /// Own columns that chained links must copy forward in turn.
    own_carry: Vec<CarryColumn>,
    /// Property name to staged column, for named projections.
    named: Vec<(String, String)>,
    _kind: PhantomData<K>,
}

pub type NodeQuery<'g> = Query<'g, Nodes>;
pub type EdgeQuery<'g> = Query<'g, Edges>;

impl<'g, K: EntityKind> ChainLink for Query<'g, K> {
    fn enter(&mut self) -> Result<()> {
        Query::enter(self)
    }
    fn exit(&mut self) {
        Query::exit(self)
    }
    fn schema(&self) -> &StagingSchema {
        &self.schema
    }
    fn position_column(&self) -> &str {
        &self.position
    }
    fn carried_columns(&self) -> Vec<CarryColumn> {
        self.carry
            .iter()
            .chain(self.own_carry.iter())
            .cloned()
            .collect()
    }
}

impl<'g, K: EntityKind> Query<'g, K> {
    fn bare(graph: &'g GraphConnection, link: Link, returns_position: bool) -> Result<Self> {
        let mut schema = StagingSchema::new();
        let position = if returns_position {
            schema.add_column(K::POSITION_COLUMN, Reify::Entity(K::TAG))?
        } else {
            schema.add_column(K::HIDDEN_POSITION_COLUMN, Reify::Hidden)?
        };
        Ok(Self {
            graph,
            schema,
            base: None,
            link,
            position,
            carry: Vec::new(),
            own_carry: Vec::new(),
            named: Vec::new(),
            _kind: PhantomData,
        })
    }

    fn derived(
        graph: &'g GraphConnection,
        base: Box<dyn ChainLink + 'g>,
        link: Link,
        returns_position: bool,
    ) -> Result<Self> {
        let mut query = Self::bare(graph, link, returns_position)?;
        for column in base.carried_columns() {
            query.schema.add_column(&column.name, column.reify)?;
            query.carry.push(column);
        }
        query.base = Some(base);
        Ok(query)
    }

    /// The entry link: all entities of one category.
    pub(crate) fn scan(graph: &'g GraphConnection, category: &str) -> Result<Self> {
        let category = graph.reading_category_id(category)?;
        Self::bare(graph, Link::Scan { category }, true)
    }

    fn require_base(&self) -> Result<&(dyn ChainLink + 'g)> {
        match &self.base {
            Some(base) => Ok(base.as_ref()),
            None => Err(TrellisError::Structure(String::from(
                "this link requires a base query",
            ))),
        }
    }

    // ------------- chaining -------------
    /// Chain a projection of the named properties. Each name becomes one
    /// result column holding the property's value, or null where an entity
    /// lacks the property; the row count is unchanged.
    pub fn return_property(self, names: &[&str]) -> Result<Query<'g, K>> {
        let graph = self.graph;
        let categories = names
            .iter()
            .map(|name| graph.reading_category_id(name))
            .collect::<Result<Vec<i64>>>()?;
        let link = Link::NamedProperties {
            categories,
            columns: Vec::new(),
        };
        let mut query = Self::derived(graph, Box::new(self), link, false)?;
        let mut columns = Vec::new();
        for name in names {
            let column = query
                .schema
                .add_column_with_unique_name(K::PROPERTY_ROOT, Reify::PropertyValue(K::TAG))?;
            query
                .named
                .push((String::from(*name), column.clone()));
            query.own_carry.push(CarryColumn {
                name: column.clone(),
                reify: Reify::PropertyValue(K::TAG),
            });
            columns.push(column);
        }
        if let Link::NamedProperties {
            columns: link_columns,
            ..
        } = &mut query.link
        {
            *link_columns = columns;
        }
        Ok(query)
    }

    /// Chain a projection of all properties: one result column holding a
    /// name-to-value map, exactly one row per entity (an entity without
    /// properties maps to an empty map, never to a missing row).
    pub fn return_properties(self) -> Result<Query<'g, K>> {
        let graph = self.graph;
        let link = Link::AllProperties {
            column: String::new(),
        };
        let mut query = Self::derived(graph, Box::new(self), link, false)?;
        let column = query
            .schema
            .add_column_with_unique_name(K::PROPERTIES_ROOT, Reify::PropertyMap(K::TAG))?;
        query.own_carry.push(CarryColumn {
            name: column.clone(),
            reify: Reify::PropertyMap(K::TAG),
        });
        query.link = Link::AllProperties { column };
        Ok(query)
    }

    /// Chain a persistent re-reference: the current position is re-staged
    /// under a fresh name and keeps being returned after further hops.
    pub fn return_this(self) -> Result<Query<'g, K>> {
        let graph = self.graph;
        let link = Link::Persist {
            column: String::new(),
        };
        let mut query = Self::derived(graph, Box::new(self), link, false)?;
        let column = query
            .schema
            .add_column_with_unique_name(K::PERSISTENT_ROOT, Reify::Entity(K::TAG))?;
        query.own_carry.push(CarryColumn {
            name: column.clone(),
            reify: Reify::Entity(K::TAG),
        });
        query.link = Link::Persist { column };
        Ok(query)
    }

    /// Chain a filter: only entities whose properties satisfy the condition
    /// remain. An entity missing a referenced property never satisfies it.
    pub fn filter(self, condition: Condition) -> Result<Query<'g, K>> {
        let graph = self.graph;
        let names: Vec<String> = condition.unresolved_property_names().into_iter().collect();
        let categories = names
            .iter()
            .map(|name| graph.reading_category_id(name))
            .collect::<Result<Vec<i64>>>()?;
        let bound = condition.bound_columns();
        let link = Link::Filter {
            condition,
            names,
            categories,
            columns: Vec::new(),
        };
        let mut query = Self::derived(graph, Box::new(self), link, true)?;
        for column in &bound {
            if !query.carry.iter().any(|c| c.name == *column) {
                return Err(TrellisError::Structure(format!(
                    "bound property column '{}' is not carried into this link",
                    column
                )));
            }
        }
        let mut columns = Vec::new();
        let count = match &query.link {
            Link::Filter { names, .. } => names.len(),
            _ => 0,
        };
        for _ in 0..count {
            columns.push(
                query
                    .schema
                    .add_column_with_unique_name(K::HIDDEN_PROPERTY_ROOT, Reify::Hidden)?,
            );
        }
        if let Link::Filter {
            columns: link_columns,
            ..
        } = &mut query.link
        {
            *link_columns = columns;
        }
        Ok(query)
    }

    /// A reference to a property staged by this projection, usable in filter
    /// conditions of chains built from it.
    pub fn property_ref(&self, name: &str) -> Result<Condition> {
        match self.named.iter().find(|(n, _)| n == name) {
            Some((_, column)) => Ok(Condition::Bound {
                name: String::from(name),
                column: column.clone(),
            }),
            None => Err(TrellisError::Structure(format!(
                "this query has no named property '{}' to reference",
                name
            ))),
        }
    }

    // ------------- lifecycle -------------
    fn enter(&mut self) -> Result<()> {
        if let Some(base) = &mut self.base {
            base.enter()?;
        }
        if let Err(e) = self.activate_and_populate() {
            // a failure mid-populate must not leak the staging tables the
            // chain has already created
            if let Some(base) = &mut self.base {
                base.exit();
            }
            return Err(e);
        }
        Ok(())
    }

    fn activate_and_populate(&mut self) -> Result<()> {
        let connection = self.graph.connection();
        self.schema.activate(connection)?;
        let populated = self.populate().and_then(|_| self.local_filter());
        if let Err(e) = populated {
            if let Err(teardown) = self.schema.deactivate(connection) {
                warn!(error = %teardown, "staging table teardown failed after populate error");
            }
            return Err(e);
        }
        Ok(())
    }

    fn exit(&mut self) {
        if self.schema.is_active() {
            if let Err(e) = self.schema.deactivate(self.graph.connection()) {
                warn!(error = %e, "staging table teardown failed");
            }
        }
        if let Some(base) = &mut self.base {
            base.exit();
        }
    }

    // ------------- populate -------------
    fn carry_insert_columns(&self) -> Vec<String> {
        self.carry.iter().map(|c| c.name.clone()).collect()
    }

    fn carry_select_columns(&self) -> Vec<String> {
        self.carry.iter().map(|c| format!("b.{}", c.name)).collect()
    }

    /// Compose the insert-from-select statement for this link and run it.
    fn populate(&self) -> Result<()> {
        let connection = self.graph.connection();
        let table = self.schema.table_name()?;
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        let sql = match &self.link {
            Link::Scan { category } => {
                params.push((*category).into());
                format!(
                    "insert into {table} ({position}) \
                     select id from {entities} where category_id = ? order by id",
                    table = table,
                    position = self.position,
                    entities = K::TAG.table(),
                )
            }
            Link::Follow { category } | Link::EdgesFrom { category } => {
                let base = self.require_base()?;
                let staged = match &self.link {
                    Link::Follow { .. } => "e.to_node_id",
                    _ => "e.id",
                };
                // outer join so that a staged row without matching edges
                // survives into the null sweep below instead of vanishing
                // inside the join
                let mut join = format!("e.from_node_id = b.{}", base.position_column());
                if let Some(category) = category {
                    join.push_str(" and e.category_id = ?");
                    params.push((*category).into());
                }
                self.compose_chained_insert(
                    table,
                    base,
                    staged,
                    &format!("left outer join edges e on {}", join),
                    &[],
                    &[],
                )?
            }
            Link::TargetNode => {
                let base = self.require_base()?;
                let join = format!("e.id = b.{}", base.position_column());
                self.compose_chained_insert(
                    table,
                    base,
                    "e.to_node_id",
                    &format!("left outer join edges e on {}", join),
                    &[],
                    &[],
                )?
            }
            Link::NamedProperties {
                categories,
                columns,
            }
            | Link::Filter {
                categories,
                columns,
                ..
            } => {
                let base = self.require_base()?;
                let mut joins = Vec::new();
                let mut selects = Vec::new();
                for (position, category) in categories.iter().enumerate() {
                    let alias = format!("a{}", position);
                    joins.push(format!(
                        "left outer join {properties} {alias} \
                         on {alias}.{owner} = b.{base_position} and {alias}.category_id = ?",
                        properties = K::TAG.property_table(),
                        alias = alias,
                        owner = K::TAG.owner_column(),
                        base_position = base.position_column(),
                    ));
                    params.push((*category).into());
                    selects.push(format!("{}.id", alias));
                }
                self.compose_chained_insert(
                    table,
                    base,
                    &format!("b.{}", base.position_column()),
                    &joins.join(" "),
                    columns,
                    &selects,
                )?
            }
            Link::AllProperties { column } | Link::Persist { column } => {
                let base = self.require_base()?;
                let staged = format!("b.{}", base.position_column());
                self.compose_chained_insert(
                    table,
                    base,
                    &staged,
                    "",
                    std::slice::from_ref(column),
                    std::slice::from_ref(&staged),
                )?
            }
        };

        let staged_rows = connection.execute(&sql, params_from_iter(params))?;
        debug!(table = %table, rows = staged_rows, "populated staging table");
        Ok(())
    }

    fn compose_chained_insert(
        &self,
        table: &str,
        base: &(dyn ChainLink + 'g),
        position_select: &str,
        joins: &str,
        extra_insert: &[String],
        extra_select: &[String],
    ) -> Result<String> {
        let base_table = base.schema().table_name()?;
        let mut insert_columns = vec![self.position.clone()];
        insert_columns.extend(self.carry_insert_columns());
        insert_columns.extend(extra_insert.iter().cloned());
        let mut select_columns = vec![String::from(position_select)];
        select_columns.extend(self.carry_select_columns());
        select_columns.extend(extra_select.iter().cloned());
        let mut sql = format!(
            "insert into {table} ({inserts}) select {selects} from {base_table} b",
            table = table,
            inserts = insert_columns.join(", "),
            selects = select_columns.join(", "),
            base_table = base_table,
        );
        if !joins.is_empty() {
            sql.push(' ');
            sql.push_str(joins);
        }
        // keep the staging order aligned with the base's, so result order is
        // stable along the whole chain
        sql.push_str(" order by b.id");
        Ok(sql)
    }

    /// Link-local filtering, run right after populating.
    fn local_filter(&self) -> Result<()> {
        match &self.link {
            Link::Follow { .. } | Link::EdgesFrom { .. } | Link::TargetNode => {
                // sweep out the rows null-extended by the populate outer join
                let table = self.schema.table_name()?;
                let swept = self.graph.connection().execute(
                    &format!(
                        "delete from {} where {} is null",
                        table, self.position
                    ),
                    [],
                )?;
                debug!(table = %table, rows = swept, "swept null traversal rows");
                Ok(())
            }
            Link::Filter {
                condition,
                names,
                columns,
                ..
            } => self.apply_condition(condition, names, columns),
            _ => Ok(()),
        }
    }

    /// The deletion algorithm for condition filters. The backing engine
    /// cannot delete through a multi-table join, so this first selects the
    /// staging row ids joined against the same property aliases the
    /// condition is bound to, restricted to rows that do NOT satisfy the
    /// condition, and then deletes by id membership. `is not true` rather
    /// than `not` keeps rows with null property values (missing properties)
    /// inside the deleted set.
    fn apply_condition(
        &self,
        condition: &Condition,
        names: &[String],
        columns: &[String],
    ) -> Result<()> {
        let connection = self.graph.connection();
        let table = self.schema.table_name()?;
        let mut joins = Vec::new();
        let mut bindings = Bindings::new();
        let mut alias_count = 0;

        for (name, column) in names.iter().zip(columns.iter()) {
            let alias = format!("f{}", alias_count);
            alias_count += 1;
            joins.push(format!(
                "left outer join {properties} {alias} on {alias}.id = t.{column}",
                properties = K::TAG.property_table(),
                alias = alias,
                column = column,
            ));
            bindings.insert(
                BindKey::Name(name.clone()),
                StagingSchema::property_value_expr(&alias),
            );
        }

        // bound references carry their kind with the carried column
        for column in condition.bound_columns() {
            let carried = self
                .carry
                .iter()
                .find(|c| c.name == column)
                .ok_or_else(|| {
                    TrellisError::Structure(format!(
                        "bound property column '{}' is not carried into this link",
                        column
                    ))
                })?;
            let tag = match carried.reify {
                Reify::PropertyValue(tag) => tag,
                _ => {
                    return Err(TrellisError::Structure(format!(
                        "column '{}' does not stage a property id",
                        column
                    )));
                }
            };
            let alias = format!("f{}", alias_count);
            alias_count += 1;
            joins.push(format!(
                "left outer join {properties} {alias} on {alias}.id = t.{column}",
                properties = tag.property_table(),
                alias = alias,
                column = column,
            ));
            bindings.insert(
                BindKey::Column(column.clone()),
                StagingSchema::property_value_expr(&alias),
            );
        }

        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        let predicate = condition.compile(&bindings, &mut params)?;
        let sql = format!(
            "delete from {table} where id in (\
             select t.id from {table} t {joins} where ({predicate}) is not true)",
            table = table,
            joins = joins.join(" "),
            predicate = predicate,
        );
        let deleted = connection.execute(&sql, params_from_iter(params))?;
        debug!(table = %table, rows = deleted, "filtered staging table");
        Ok(())
    }

    // ------------- terminal operations -------------
    /// Run the chain and collect every result row, in staging order.
    pub fn all(&mut self) -> Result<Vec<ResultRow>> {
        self.enter()?;
        let rows = self.collect(None);
        self.exit();
        rows
    }

    /// Run the chain and return the first result row, if any. This pays the
    /// full enter/exit cost of the chain.
    pub fn first(&mut self) -> Result<Option<ResultRow>> {
        self.enter()?;
        let rows = self.collect(Some(1));
        self.exit();
        let mut rows = rows?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    /// Run the chain and count the staged rows directly, skipping
    /// reification joins entirely.
    pub fn count(&mut self) -> Result<i64> {
        self.enter()?;
        let counted = self.schema.table_name().and_then(|table| {
            Ok(self.graph.connection().query_row(
                &format!("select count(*) from {}", table),
                [],
                |row| row.get::<_, i64>(0),
            )?)
        });
        self.exit();
        counted
    }

    /// Read back the outermost staging table: one query, outer-joined per
    /// column strategy, then the post-processing pass that folds batched
    /// property rows into per-entity maps. The decode arities here mirror
    /// the select arities in [`StagingSchema::build_select`].
    fn collect(&self, limit: Option<usize>) -> Result<Vec<ResultRow>> {
        let connection = self.graph.connection();
        let mut sql = self.schema.build_select()?;
        if let Some(limit) = limit {
            sql.push_str(&format!(" limit {}", limit));
        }

        let mut out: Vec<ResultRow> = Vec::new();
        // (row, cell, owner id) per PropertyMap column, patched below
        let mut pending: HashMap<String, Vec<(usize, usize, Option<i64>)>, IdHasher> =
            HashMap::default();
        {
            let mut statement = connection.prepare(&sql)?;
            let mut rows = statement.query([])?;
            while let Some(row) = rows.next()? {
                let mut cells: ResultRow = Vec::new();
                let mut index = 0;
                for column in self.schema.columns() {
                    match column.reify() {
                        Reify::Raw => {
                            let staged: Option<i64> = row.get(index)?;
                            index += 1;
                            cells.push(match staged {
                                Some(v) => ResultItem::Value(Value::Int(v)),
                                None => ResultItem::Null,
                            });
                        }
                        Reify::Hidden => {}
                        Reify::Entity(tag) => {
                            let id: Option<i64> = row.get(index)?;
                            let category: Option<i64> = row.get(index + 1)?;
                            match tag {
                                EntityTag::Node => {
                                    index += 2;
                                    cells.push(match (id, category) {
                                        (Some(id), Some(category)) => {
                                            ResultItem::Node(Node::new(id, category))
                                        }
                                        _ => ResultItem::Null,
                                    });
                                }
                                EntityTag::Edge => {
                                    let from: Option<i64> = row.get(index + 2)?;
                                    let to: Option<i64> = row.get(index + 3)?;
                                    index += 4;
                                    cells.push(match (id, category, from, to) {
                                        (Some(id), Some(category), Some(from), Some(to)) => {
                                            ResultItem::Edge(Edge::new(id, category, from, to))
                                        }
                                        _ => ResultItem::Null,
                                    });
                                }
                            }
                        }
                        Reify::PropertyValue(_) => {
                            let value = FlexibleValue::from_row(row, index)?;
                            index += 3;
                            cells.push(match value.value() {
                                Some(value) => ResultItem::Value(value),
                                None => ResultItem::Null,
                            });
                        }
                        Reify::PropertyMap(_) => {
                            let owner: Option<i64> = row.get(index)?;
                            index += 1;
                            pending
                                .entry(String::from(column.name()))
                                .or_default()
                                .push((out.len(), cells.len(), owner));
                            cells.push(ResultItem::Properties(BTreeMap::new()));
                        }
                    }
                }
                out.push(cells);
            }
        }

        // post-processing: one batched fetch per PropertyMap column, folded
        // into a map per owner and patched into the collected rows
        for column in self.schema.columns() {
            let Reify::PropertyMap(tag) = column.reify() else {
                continue;
            };
            let Some(patches) = pending.get(column.name()) else {
                continue;
            };
            let sql = self.schema.build_property_map_select(column.name(), tag)?;
            let mut folded: HashMap<i64, BTreeMap<String, Value>, IdHasher> = HashMap::default();
            let mut statement = connection.prepare(&sql)?;
            let mut rows = statement.query([])?;
            while let Some(row) = rows.next()? {
                let owner: i64 = row.get(0)?;
                let name: String = row.get(1)?;
                if let Some(value) = FlexibleValue::from_row(row, 2)?.value() {
                    folded.entry(owner).or_default().insert(name, value);
                }
            }
            for (row, cell, owner) in patches {
                let map = owner
                    .and_then(|owner| folded.get(&owner).cloned())
                    .unwrap_or_default();
                out[*row][*cell] = ResultItem::Properties(map);
            }
        }

        // strip the synthetic row id leading every row
        for row in &mut out {
            if !row.is_empty() {
                row.remove(0);
            }
        }
        Ok(out)
    }
}

// ------------- kind-changing pivots -------------
impl<'g> Query<'g, Nodes> {
    /// Follow edges (optionally of a category) from each staged node to its
    /// target node. One output row per matching edge; a node with three
    /// matching out-edges fans out to three rows.
    ///
    /// `q.follow(category)` is equivalent to, but cheaper than,
    /// `q.edges(category)` followed by `.node()`.
    pub fn follow(self, category: Option<&str>) -> Result<NodeQuery<'g>> {
        let graph = self.graph;
        let category = category
            .map(|name| graph.reading_category_id(name))
            .transpose()?;
        Query::derived(graph, Box::new(self), Link::Follow { category }, true)
    }

    /// Pivot to the edges (optionally of a category) leaving each staged
    /// node.
    pub fn edges(self, category: Option<&str>) -> Result<EdgeQuery<'g>> {
        let graph = self.graph;
        let category = category
            .map(|name| graph.reading_category_id(name))
            .transpose()?;
        Query::derived(graph, Box::new(self), Link::EdgesFrom { category }, true)
    }
}

impl<'g> Query<'g, Edges> {
    /// Pivot to the destination node of each staged edge.
    pub fn node(self) -> Result<NodeQuery<'g>> {
        let graph = self.graph;
        Query::derived(graph, Box::new(self), Link::TargetNode, true)
    }
}

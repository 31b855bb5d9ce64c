//! Staging tables for intermediate query results.
//!
//! A [`StagingSchema`] represents one chain link's staging table both before
//! and during its existence in the backing store. Columns can be added while
//! the schema is mutable; [`StagingSchema::activate`] freezes the schema into
//! a real temporary table and [`StagingSchema::deactivate`] drops it again,
//! returning the schema to the mutable state. Every column carries a
//! [`Reify`] strategy describing how its raw staged value is turned back into
//! a caller-visible result column at read-back time.

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{Result, TrellisError};
use crate::store;
use crate::value::FlexibleValue;

// ------------- EntityTag -------------
/// Which entity kind a staged id points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTag {
    Node,
    Edge,
}
impl EntityTag {
    pub fn table(self) -> &'static str {
        match self {
            EntityTag::Node => store::NODES_TABLE,
            EntityTag::Edge => store::EDGES_TABLE,
        }
    }
    pub fn property_table(self) -> &'static str {
        match self {
            EntityTag::Node => store::NODE_PROPERTIES_TABLE,
            EntityTag::Edge => store::EDGE_PROPERTIES_TABLE,
        }
    }
    /// The owner column in the property table for this kind.
    pub fn owner_column(self) -> &'static str {
        match self {
            EntityTag::Node => "node_id",
            EntityTag::Edge => "edge_id",
        }
    }
}

// ------------- Reify -------------
/// How a staged column becomes a result column. The strategy set is closed,
/// so read-back dispatches by match and exhaustiveness is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reify {
    /// The staged value itself; used for the synthetic row id.
    Raw,
    /// Internal-only scaffolding, contributes nothing at read-back.
    Hidden,
    /// Outer-join the entity table on the staged id and return the entity.
    Entity(EntityTag),
    /// Outer-join the property table on the staged property-row id and
    /// return the property's value.
    PropertyValue(EntityTag),
    /// The staged id is an owner id; its properties are batch-fetched and
    /// folded into a single name-to-value map in a post-processing pass.
    PropertyMap(EntityTag),
}

// ------------- Column -------------
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    reify: Reify,
}
impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn reify(&self) -> Reify {
        self.reify
    }
}

// ------------- name synthesis -------------
lazy_static! {
    /// Matches a generated name of the form `{root}_{N}`.
    static ref GENERATED_NAME: Regex = Regex::new(r"^(.*)_([0-9]+)$").unwrap();
}

/// Synthesize `{root}_{N}` where N is the smallest non-negative integer not
/// already taken by an existing `{root}_*` name. Scanning the existing names
/// rather than keeping a counter keeps the result unique even after names
/// have been removed or reordered.
fn unique_name<'a>(root: &str, existing: impl Iterator<Item = &'a str>) -> String {
    let mut used = HashSet::new();
    for name in existing {
        if let Some(captures) = GENERATED_NAME.captures(name) {
            if &captures[1] == root {
                if let Ok(n) = captures[2].parse::<u64>() {
                    used.insert(n);
                }
            }
        }
    }
    let mut n = 0;
    while used.contains(&n) {
        n += 1;
    }
    format!("{}_{}", root, n)
}

/// All table names the backing store currently knows about, permanent and
/// temporary alike.
fn known_table_names(connection: &Connection) -> Result<Vec<String>> {
    let mut statement = connection.prepare(
        "
        select name from sqlite_master where type = 'table'
        union
        select name from sqlite_temp_master where type = 'table'
    ",
    )?;
    let names = statement
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

// ------------- StagingSchema -------------
#[derive(Debug)]
struct ActiveStaging {
    table: String,
    index: Option<String>,
}

/// The schema of one staging table. Mutable until activated, immutable while
/// a physical temporary table exists for it.
#[derive(Debug)]
pub struct StagingSchema {
    columns: Vec<Column>,
    active: Option<ActiveStaging>,
}

impl StagingSchema {
    /// A fresh schema holding only the synthetic row id column.
    pub fn new() -> Self {
        Self {
            columns: vec![Column {
                name: String::from("id"),
                reify: Reify::Raw,
            }],
            active: None,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn assert_not_active(&self) -> Result<()> {
        if self.active.is_some() {
            return Err(TrellisError::State(String::from(
                "cannot perform this operation while the staging table is active",
            )));
        }
        Ok(())
    }

    /// Append a column. Returns the column name, which doubles as the handle
    /// used in populate and filter statements.
    pub fn add_column(&mut self, name: &str, reify: Reify) -> Result<String> {
        self.assert_not_active()?;
        if self.columns.iter().any(|c| c.name == name) {
            return Err(TrellisError::Structure(format!(
                "column name '{}' is already used in this staging table",
                name
            )));
        }
        self.columns.push(Column {
            name: String::from(name),
            reify,
        });
        Ok(String::from(name))
    }

    /// Append a column whose name starts with `root` and is unique relative
    /// to the existing columns.
    pub fn add_column_with_unique_name(&mut self, root: &str, reify: Reify) -> Result<String> {
        self.assert_not_active()?;
        let name = unique_name(root, self.column_names());
        self.add_column(&name, reify)
    }

    /// Create the temporary table and its supporting index on the first
    /// substantive column. The schema is immutable until [`deactivate`].
    ///
    /// [`deactivate`]: StagingSchema::deactivate
    pub fn activate(&mut self, connection: &Connection) -> Result<()> {
        self.assert_not_active()?;
        let known = known_table_names(connection)?;
        let table = unique_name("temptable", known.iter().map(|n| n.as_str()));
        let mut definitions = vec![format!("{} integer primary key", self.columns[0].name)];
        for column in &self.columns[1..] {
            definitions.push(format!("{} integer", column.name));
        }
        connection.execute(
            &format!(
                "create temporary table {} ({})",
                table,
                definitions.join(", ")
            ),
            [],
        )?;
        // index the first substantive column, which traversals join against
        let index = match self.columns.get(1) {
            Some(column) => {
                let index = format!("index_{}", table);
                connection.execute(
                    &format!("create index {} on {}({})", index, table, column.name),
                    [],
                )?;
                Some(index)
            }
            None => None,
        };
        debug!(table = %table, columns = self.columns.len(), "created staging table");
        self.active = Some(ActiveStaging { table, index });
        Ok(())
    }

    /// Drop the index and the table, returning the schema to mutability.
    pub fn deactivate(&mut self, connection: &Connection) -> Result<()> {
        let active = self.active.take().ok_or_else(|| {
            TrellisError::State(String::from(
                "cannot deactivate a staging table that is not active",
            ))
        })?;
        if let Some(index) = &active.index {
            connection.execute(&format!("drop index {}", index), [])?;
        }
        connection.execute(&format!("drop table {}", active.table), [])?;
        debug!(table = %active.table, "dropped staging table");
        Ok(())
    }

    /// The physical table name. Fails unless the schema is active.
    pub fn table_name(&self) -> Result<&str> {
        match &self.active {
            Some(active) => Ok(&active.table),
            None => Err(TrellisError::State(String::from(
                "the staging table has not been created yet",
            ))),
        }
    }

    /// Build the read-back query for this staging table.
    ///
    /// Every column contributes select expressions and (for the joined
    /// strategies) a join according to its [`Reify`] strategy. Joins are
    /// always outer joins so that a null staged id turns into a null result
    /// cell instead of silently dropping the row; reification never changes
    /// the row count. The select list leads with the synthetic row id, which
    /// also fixes the result order.
    pub fn build_select(&self) -> Result<String> {
        let table = self.table_name()?;
        let mut selects = Vec::new();
        let mut joins = Vec::new();
        for (position, column) in self.columns.iter().enumerate() {
            let alias = format!("j{}", position);
            match column.reify {
                Reify::Raw | Reify::PropertyMap(_) => {
                    selects.push(format!("t.{}", column.name));
                }
                Reify::Hidden => {}
                Reify::Entity(tag) => {
                    selects.push(format!("{}.id", alias));
                    selects.push(format!("{}.category_id", alias));
                    if tag == EntityTag::Edge {
                        selects.push(format!("{}.from_node_id", alias));
                        selects.push(format!("{}.to_node_id", alias));
                    }
                    joins.push(format!(
                        "left outer join {} {} on {}.id = t.{}",
                        tag.table(),
                        alias,
                        alias,
                        column.name
                    ));
                }
                Reify::PropertyValue(tag) => {
                    selects.push(format!("{}.value_int", alias));
                    selects.push(format!("{}.value_float", alias));
                    selects.push(format!("{}.value_str", alias));
                    joins.push(format!(
                        "left outer join {} {} on {}.id = t.{}",
                        tag.property_table(),
                        alias,
                        alias,
                        column.name
                    ));
                }
            }
        }
        let mut sql = format!("select {} from {} t", selects.join(", "), table);
        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }
        sql.push_str(" order by t.id");
        Ok(sql)
    }

    /// The batched property fetch used by [`Reify::PropertyMap`] columns:
    /// one join against the property and category tables for every staged
    /// owner id, fanned out one row per property. The fold back to one map
    /// per owner happens in the caller's post-processing pass.
    pub fn build_property_map_select(&self, column: &str, tag: EntityTag) -> Result<String> {
        let table = self.table_name()?;
        Ok(format!(
            "select t.{column}, c.name, p.value_int, p.value_float, p.value_str \
             from {table} t \
             join {properties} p on p.{owner} = t.{column} \
             join {categories} c on c.id = p.category_id",
            column = column,
            table = table,
            properties = tag.property_table(),
            owner = tag.owner_column(),
            categories = store::CATEGORIES_TABLE,
        ))
    }

    /// The value expression for a property table aliased as `alias`,
    /// reproducing [`FlexibleValue`]'s read order inside the backing store.
    pub fn property_value_expr(alias: &str) -> String {
        FlexibleValue::read_expr(alias)
    }
}

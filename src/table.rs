use crate::{Error, Result, Value};
use std::{collections::HashSet, sync::Arc};

/// Declarative specification of a table column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    /// `Value` with a `None` payload describing the column type.
    pub value: Value,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
}

/// Foreign key constraint: local columns referencing another table.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub table: String,
    pub references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Immutable table metadata: identity is the table name.
///
/// Declared once through the builder methods and then shared behind an `Arc`
/// by [`TableDef::build`]; the engine never mutates it afterwards.
#[derive(Debug, Default)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a NOT NULL column of the given type.
    pub fn column(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            value,
            nullable: false,
            primary_key: false,
            unique: false,
        });
        self
    }

    /// Append a nullable column of the given type.
    pub fn nullable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            value,
            nullable: true,
            primary_key: false,
            unique: false,
        });
        self
    }

    /// Mark the given columns as the primary key.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        for column in &mut self.columns {
            if columns.contains(&column.name.as_str()) {
                column.primary_key = true;
            }
        }
        self
    }

    pub fn unique(mut self, column: &str) -> Self {
        for c in &mut self.columns {
            if c.name == column {
                c.unique = true;
            }
        }
        self
    }

    pub fn foreign_key(mut self, columns: &[&str], table: &str, references: &[&str]) -> Self {
        self.foreign_keys.push(ForeignKey {
            columns: columns.iter().map(|v| v.to_string()).collect(),
            table: table.into(),
            references: references.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn index(mut self, columns: &[&str]) -> Self {
        let name = format!("{}_{}_idx", self.name, columns.join("_"));
        self.indexes.push(IndexDef {
            name,
            columns: columns.iter().map(|v| v.to_string()).collect(),
            unique: false,
        });
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// Validate the declaration and freeze it into a shareable [`Table`].
    pub fn build(self) -> Result<Table> {
        if self.name.is_empty() {
            return Err(Error::construct("table name cannot be empty"));
        }
        if self.columns.is_empty() {
            return Err(Error::construct(format!(
                "table `{}` must declare at least one column",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::construct(format!(
                    "table `{}` declares column `{}` twice",
                    self.name, column.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            if fk.columns.len() != fk.references.len() {
                return Err(Error::construct(format!(
                    "foreign key on `{}` has mismatched column counts",
                    self.name
                )));
            }
            for local in &fk.columns {
                if self.column_index(local).is_none() {
                    return Err(Error::construct(format!(
                        "foreign key on `{}` references unknown local column `{}`",
                        self.name, local
                    )));
                }
            }
        }
        for index in &self.indexes {
            for column in &index.columns {
                if self.column_index(column).is_none() {
                    return Err(Error::construct(format!(
                        "index `{}` references unknown column `{}`",
                        index.name, column
                    )));
                }
            }
        }
        Ok(Table {
            def: Arc::new(self),
        })
    }
}

/// Shared handle to an immutable [`TableDef`].
#[derive(Debug, Clone)]
pub struct Table {
    def: Arc<TableDef>,
}

impl Table {
    pub fn def(&self) -> &Arc<TableDef> {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Typed handle to a declared column, usable inside expressions.
    pub fn col(&self, name: &str) -> Result<Column> {
        let index = self.def.column_index(name).ok_or_else(|| {
            Error::construct(format!(
                "table `{}` has no column named `{}`",
                self.def.name, name
            ))
        })?;
        Ok(Column {
            table: self.def.clone(),
            index,
        })
    }
}

/// Typed column handle: a non-owning back-reference into its table plus the
/// column position.
#[derive(Debug, Clone)]
pub struct Column {
    pub(crate) table: Arc<TableDef>,
    pub(crate) index: usize,
}

impl Column {
    pub fn def(&self) -> &ColumnDef {
        &self.table.columns[self.index]
    }

    pub fn name(&self) -> &str {
        &self.def().name
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    /// The column type as an empty `Value`.
    pub fn value_type(&self) -> Value {
        self.def().value.empty_of()
    }
}

/// Orders tables so that every table appears after the tables its foreign
/// keys depend on. Drop order is the reverse.
pub fn creation_order(tables: &[Table]) -> Result<Vec<Table>> {
    let mut remaining: Vec<&Table> = tables.iter().collect();
    let mut ordered = Vec::with_capacity(tables.len());
    let mut created = HashSet::new();
    while !remaining.is_empty() {
        let position = remaining.iter().position(|t| {
            t.def().foreign_keys.iter().all(|fk| {
                fk.table == t.def().name
                    || created.contains(fk.table.as_str())
                    || !tables.iter().any(|o| o.name() == fk.table)
            })
        });
        let Some(position) = position else {
            return Err(Error::construct(format!(
                "circular foreign key dependency involving `{}`",
                remaining[0].name()
            )));
        };
        let table = remaining.remove(position);
        created.insert(table.name().to_string());
        ordered.push(table.clone());
    }
    Ok(ordered)
}

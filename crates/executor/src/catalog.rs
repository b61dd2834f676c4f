//! Catalog queries.
//!
//! Metadata lookups used by completers and `\d`-style commands. The query
//! family is resolved from [`CatalogDialect`] once per physical connection:
//! with the default `Auto`, `SHOW` statements for reduced-capability
//! servers and `pg_catalog` queries otherwise. Object definitions use
//! `pg_catalog` in both families.

use sqlrun_core::{Error, ObjectKind, Result, Row};

use crate::config::CatalogDialect;
use crate::session::Session;

const SEARCH_PATH_QUERY: &str = "SELECT * FROM unnest(current_schemas(true))";

const SCHEMATA_QUERY: &str = "SELECT nspname FROM pg_catalog.pg_namespace ORDER BY 1";

const RELATIONS_QUERY: &str = "\
SELECT n.nspname schema_name, c.relname table_name
FROM pg_catalog.pg_class c
LEFT JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind = ANY(ARRAY[{kinds}]::\"char\"[])
ORDER BY 1, 2";

const COLUMNS_QUERY: &str = "\
SELECT nsp.nspname schema_name,
       cls.relname table_name,
       att.attname column_name,
       att.atttypid::regtype::text type_name,
       att.atthasdef has_default,
       pg_catalog.pg_get_expr(def.adbin, def.adrelid, true) column_default
FROM pg_catalog.pg_attribute att
INNER JOIN pg_catalog.pg_class cls ON att.attrelid = cls.oid
INNER JOIN pg_catalog.pg_namespace nsp ON cls.relnamespace = nsp.oid
LEFT OUTER JOIN pg_catalog.pg_attrdef def
    ON def.adrelid = att.attrelid AND def.adnum = att.attnum
WHERE cls.relkind = ANY(ARRAY[{kinds}]::\"char\"[])
  AND NOT att.attisdropped
  AND att.attnum > 0
ORDER BY 1, 2, att.attnum";

const DATABASES_QUERY: &str = "SELECT d.datname FROM pg_catalog.pg_database d ORDER BY 1";

const DATATYPES_QUERY: &str = "\
SELECT n.nspname schema_name, t.typname type_name
FROM pg_catalog.pg_type t
INNER JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE (t.typrelid = 0 OR (SELECT c.relkind = 'c' FROM pg_catalog.pg_class c WHERE c.oid = t.typrelid))
  AND NOT EXISTS (SELECT 1 FROM pg_catalog.pg_type el WHERE el.oid = t.typelem AND el.typarray = t.oid)
  AND n.nspname <> 'pg_catalog'
  AND n.nspname <> 'information_schema'
ORDER BY 1, 2";

const VIEW_DEFINITION_QUERY: &str = "\
WITH v AS (SELECT $1::text::pg_catalog.regclass::pg_catalog.oid AS v_oid)
SELECT nspname::text, relname::text, relkind::text, pg_catalog.pg_get_viewdef(c.oid, true)
FROM pg_catalog.pg_class c
LEFT JOIN pg_catalog.pg_namespace n ON (c.relnamespace = n.oid)
JOIN v ON (c.oid = v.v_oid)";

const FUNCTION_DEFINITION_QUERY: &str = "\
WITH f AS (SELECT $1::text::pg_catalog.regproc::pg_catalog.oid AS f_oid)
SELECT pg_catalog.pg_get_functiondef(f.f_oid)
FROM f";

const TABLE_KINDS: &str = "'r', 'p', 'f'";
const VIEW_KINDS: &str = "'v', 'm'";

/// A `(schema, relation)` pair.
pub type Relation = (String, String);

/// Column metadata of a table or view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Schema name
    pub schema: String,
    /// Table or view name
    pub relation: String,
    /// Column name
    pub column: String,
    /// Type name
    pub type_name: String,
    /// Whether the column has a default expression
    pub has_default: bool,
    /// Default expression
    pub default: Option<String>,
}

#[derive(Clone, Copy)]
enum RelationKind {
    Table,
    View,
}

impl RelationKind {
    fn show_keyword(self) -> &'static str {
        match self {
            RelationKind::Table => "TABLES",
            RelationKind::View => "VIEWS",
        }
    }

    fn relkinds(self) -> &'static str {
        match self {
            RelationKind::Table => TABLE_KINDS,
            RelationKind::View => VIEW_KINDS,
        }
    }
}

fn text(row: &Row, i: usize) -> String {
    row.get(i).cloned().flatten().unwrap_or_default()
}

impl Session {
    fn show_dialect(&self) -> bool {
        self.catalog_dialect() == CatalogDialect::Show
    }

    /// Rows of `sql`; empty after a protocol violation.
    fn catalog_rows(&mut self, sql: &str, params: &[Option<String>]) -> Result<Vec<Row>> {
        let mut cursor = self.cursor()?;
        tracing::debug!(target: "sqlrun::executor", sql, "Catalog query");
        cursor.execute(sql, params)?;
        Ok(cursor.into_rows().collect())
    }

    /// Current search path, in order.
    pub fn search_path(&mut self) -> Result<Vec<String>> {
        if self.show_dialect() {
            Ok(self
                .catalog_rows("SHOW search_path", &[])?
                .iter()
                .flat_map(|row| {
                    text(row, 0)
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .collect::<Vec<_>>()
                })
                .collect())
        } else {
            Ok(self
                .catalog_rows(SEARCH_PATH_QUERY, &[])?
                .iter()
                .map(|row| text(row, 0))
                .collect())
        }
    }

    /// Schema names.
    pub fn schemata(&mut self) -> Result<Vec<String>> {
        let sql = if self.show_dialect() {
            "SHOW EXTENDED SCHEMAS"
        } else {
            SCHEMATA_QUERY
        };
        Ok(self
            .catalog_rows(sql, &[])?
            .iter()
            .map(|row| text(row, 0))
            .collect())
    }

    fn relations(&mut self, kind: RelationKind) -> Result<Vec<Relation>> {
        if !self.show_dialect() {
            let sql = RELATIONS_QUERY.replace("{kinds}", kind.relkinds());
            return Ok(self
                .catalog_rows(&sql, &[])?
                .iter()
                .map(|row| (text(row, 0), text(row, 1)))
                .collect());
        }

        let mut relations = Vec::new();
        for schema in self.schemata()? {
            let sql = format!("SHOW {} FROM {}", kind.show_keyword(), schema);
            for row in self.catalog_rows(&sql, &[])? {
                relations.push((schema.clone(), text(&row, 0)));
            }
        }
        Ok(relations)
    }

    /// `(schema, table)` pairs.
    pub fn tables(&mut self) -> Result<Vec<Relation>> {
        self.relations(RelationKind::Table)
    }

    /// `(schema, view)` pairs, materialized views included.
    pub fn views(&mut self) -> Result<Vec<Relation>> {
        self.relations(RelationKind::View)
    }

    fn columns(&mut self, kind: RelationKind) -> Result<Vec<ColumnInfo>> {
        if !self.show_dialect() {
            let sql = COLUMNS_QUERY.replace("{kinds}", kind.relkinds());
            return Ok(self
                .catalog_rows(&sql, &[])?
                .iter()
                .map(|row| ColumnInfo {
                    schema: text(row, 0),
                    relation: text(row, 1),
                    column: text(row, 2),
                    type_name: text(row, 3),
                    has_default: matches!(text(row, 4).as_str(), "t" | "true"),
                    default: row.get(5).cloned().flatten(),
                })
                .collect());
        }

        let mut columns = Vec::new();
        for (schema, relation) in self.relations(kind)? {
            let qualified = if schema.is_empty() {
                relation.clone()
            } else {
                format!("{}.{}", schema, relation)
            };
            let rows = match self.catalog_rows(&format!("SHOW COLUMNS FROM {}", qualified), &[]) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::debug!(target: "sqlrun::executor", relation = %qualified, error = %err, "Show columns failed, trying without schema");
                    self.catalog_rows(&format!("SHOW COLUMNS FROM {}", relation), &[])?
                }
            };
            for row in rows.iter().filter(|row| row.len() >= 3) {
                columns.push(ColumnInfo {
                    schema: schema.clone(),
                    relation: relation.clone(),
                    column: text(row, 0),
                    type_name: text(row, 2),
                    has_default: false,
                    default: None,
                });
            }
        }
        Ok(columns)
    }

    /// Columns of every table.
    pub fn table_columns(&mut self) -> Result<Vec<ColumnInfo>> {
        self.columns(RelationKind::Table)
    }

    /// Columns of every view.
    pub fn view_columns(&mut self) -> Result<Vec<ColumnInfo>> {
        self.columns(RelationKind::View)
    }

    /// Database names. The `SHOW` dialect has no databases and reports a
    /// single empty name.
    pub fn databases(&mut self) -> Result<Vec<String>> {
        if self.show_dialect() {
            return Ok(vec![String::new()]);
        }
        Ok(self
            .catalog_rows(DATABASES_QUERY, &[])?
            .iter()
            .map(|row| text(row, 0))
            .collect())
    }

    /// `(schema, type)` pairs.
    pub fn datatypes(&mut self) -> Result<Vec<Relation>> {
        if self.show_dialect() {
            return Ok(self
                .catalog_rows("SHOW EXTENDED TYPES", &[])?
                .iter()
                .map(|row| ("public".to_string(), text(row, 0)))
                .collect());
        }
        Ok(self
            .catalog_rows(DATATYPES_QUERY, &[])?
            .iter()
            .map(|row| (text(row, 0), text(row, 1)))
            .collect())
    }

    /// First row of a definition lookup; a server fault or no row means the
    /// object does not exist.
    fn definition_row(&mut self, sql: &str, kind: ObjectKind, name: &str) -> Result<Row> {
        let not_found = || Error::NotFound {
            kind,
            name: name.to_string(),
        };
        tracing::debug!(target: "sqlrun::executor", ?kind, name, "Definition query");
        match self.catalog_rows(sql, &[Some(name.to_string())]) {
            Ok(rows) => rows.into_iter().next().ok_or_else(not_found),
            Err(err) if err.is_database_fault() && !self.is_connection_closed() => {
                tracing::debug!(target: "sqlrun::executor", name, error = %err, "Definition lookup failed");
                Err(not_found())
            }
            Err(err) => Err(err),
        }
    }

    /// SQL recreating the view named `name`.
    pub fn view_definition(&mut self, name: &str) -> Result<String> {
        let row = self.definition_row(VIEW_DEFINITION_QUERY, ObjectKind::View, name)?;
        let materialized = if text(&row, 2) == "m" { "MATERIALIZED " } else { "" };
        Ok(format!(
            "CREATE OR REPLACE {}VIEW {}.{} AS \n{}",
            materialized,
            text(&row, 0),
            text(&row, 1),
            text(&row, 3)
        ))
    }

    /// SQL recreating the function named `name`.
    pub fn function_definition(&mut self, name: &str) -> Result<String> {
        let row = self.definition_row(FUNCTION_DEFINITION_QUERY, ObjectKind::Function, name)?;
        Ok(text(&row, 0))
    }
}

#[cfg(test)]
mod tests {
    use crate::session::short_host;

    #[test]
    fn test_short_host() {
        assert_eq!(short_host("db.example.com"), "db");
        assert_eq!(short_host("a.example.com,b.example.com"), "a");
        assert_eq!(short_host("localhost"), "localhost");
        assert_eq!(short_host("/tmp"), "/tmp");
        assert_eq!(short_host(""), "");
    }
}

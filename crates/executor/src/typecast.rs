//! Type-coercion registration.
//!
//! A session keeps a [`TypeCasters`] registry mapping type OIDs to text
//! casters. Casters are applied to fetched values whose column type the
//! driver reported. Registration runs at connect time and only for
//! full-capability servers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use sqlrun_core::{Column, Connection, Result, Row};

/// Converts one text value.
pub type Caster = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// OID → caster registry.
#[derive(Clone, Default)]
pub struct TypeCasters {
    by_oid: HashMap<u32, Caster>,
}

impl TypeCasters {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `caster` for every OID in `oids`, replacing earlier ones.
    pub fn register(&mut self, oids: &[u32], caster: Caster) {
        for oid in oids {
            self.by_oid.insert(*oid, Arc::clone(&caster));
        }
    }

    /// Whether a caster is registered for `oid`.
    pub fn contains(&self, oid: u32) -> bool {
        self.by_oid.contains_key(&oid)
    }

    /// Number of registered OIDs.
    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.by_oid.clear();
    }

    /// Apply registered casters to a row described by `columns`.
    pub fn apply(&self, columns: &[Column], row: Row) -> Row {
        if self.by_oid.is_empty() {
            return row;
        }
        row.into_iter()
            .enumerate()
            .map(|(i, value)| {
                let caster = columns
                    .get(i)
                    .and_then(|c| c.type_oid)
                    .and_then(|oid| self.by_oid.get(&oid));
                match (value, caster) {
                    (Some(v), Some(cast)) => Some(cast(&v)),
                    (value, _) => value,
                }
            })
            .collect()
    }
}

impl fmt::Debug for TypeCasters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut oids: Vec<_> = self.by_oid.keys().collect();
        oids.sort();
        f.debug_struct("TypeCasters").field("oids", &oids).finish()
    }
}

/// OID of the single column `sql` would return, if the driver reports it.
///
/// A protocol violation counts as "no description".
fn probe_oid(conn: &mut dyn Connection, sql: &str) -> Result<Option<u32>> {
    match conn.describe(sql) {
        Ok(columns) => Ok(columns.first().and_then(|c| c.type_oid)),
        Err(err) if err.as_protocol_violation().is_some() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Keep date and timestamp values as the server's text.
///
/// Out-of-range values (e.g. BC dates) then never fail to decode.
pub fn register_date_typecasters(conn: &mut dyn Connection, casters: &mut TypeCasters) -> Result<()> {
    let date_oid = match probe_oid(conn, "SELECT NULL::date")? {
        Some(oid) => oid,
        None => return Ok(()),
    };
    let mut oids = vec![date_oid];
    if let Some(timestamp_oid) = probe_oid(conn, "SELECT NULL::timestamp")? {
        oids.push(timestamp_oid);
    }
    casters.register(&oids, Arc::new(|v: &str| v.to_string()));
    tracing::debug!(target: "sqlrun::executor", ?oids, "Registered date typecasters");
    Ok(())
}

/// Decode `json` and `jsonb` values with `decode`.
///
/// Returns the subset of `{"json", "jsonb"}` that was registered; a type
/// the server does not know is skipped.
pub fn register_json_typecasters(
    conn: &mut dyn Connection,
    casters: &mut TypeCasters,
    decode: Caster,
) -> BTreeSet<&'static str> {
    let mut available = BTreeSet::new();
    for name in ["json", "jsonb"] {
        match conn.describe(&format!("SELECT NULL::{}", name)) {
            Ok(columns) => {
                if let Some(oid) = columns.first().and_then(|c| c.type_oid) {
                    casters.register(&[oid], Arc::clone(&decode));
                    available.insert(name);
                }
            }
            Err(err) => {
                tracing::debug!(target: "sqlrun::executor", type_name = name, error = %err, "JSON typecaster not registered");
            }
        }
    }
    available
}

/// Legacy key/value type registration; hstore values already arrive as text.
pub fn register_hstore_typecaster(_conn: &mut dyn Connection, _casters: &mut TypeCasters) {}

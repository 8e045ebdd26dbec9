//! Schema registry: the authoritative version log of every database.
//!
//! Each database owns a log of declarations. A declaration maps store names
//! to a definition, or to `None` to delete the store in that version. The
//! schema visible at version `v` is the fold of every declaration up to `v`:
//! definitions are added in order and a later `None` removes an earlier one.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use ratedeck_storage::{SchemaMap, StoreSchema};
use std::collections::{BTreeMap, HashMap};

/// Fallback specification when no default is configured.
pub const FALLBACK_INDEX_SPEC: &str = "++id";

/// Store changes introduced by one version.
pub type StoreChanges = BTreeMap<String, Option<StoreSchema>>;

/// One entry of a schema log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDeclaration {
    /// Version this declaration introduces.
    pub version: u32,
    /// Stores added, redefined (`Some`) or deleted (`None`).
    pub stores: StoreChanges,
}

/// Version history of a single database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaLog {
    declarations: Vec<SchemaDeclaration>,
}

impl SchemaLog {
    /// Current version, or 0 if nothing was declared.
    pub fn current_version(&self) -> u32 {
        self.declarations.last().map_or(0, |d| d.version)
    }

    /// All declarations, oldest first.
    pub fn declarations(&self) -> &[SchemaDeclaration] {
        &self.declarations
    }

    /// Schema visible at the current version.
    pub fn derived(&self) -> SchemaMap {
        self.derived_at(self.current_version())
    }

    /// Schema visible at `version`.
    pub fn derived_at(&self, version: u32) -> SchemaMap {
        let mut schema = SchemaMap::new();
        for declaration in self.declarations.iter().take_while(|d| d.version <= version) {
            for (name, definition) in &declaration.stores {
                match definition {
                    Some(def) => {
                        schema.insert(name.clone(), def.clone());
                    }
                    None => {
                        schema.remove(name);
                    }
                }
            }
        }
        schema
    }

    fn declare(&mut self, version: u32, stores: StoreChanges) -> Result<(), String> {
        let current = self.current_version();
        if version <= current {
            return Err(format!(
                "version {version} must be greater than current version {current}"
            ));
        }
        self.declarations.push(SchemaDeclaration { version, stores });
        Ok(())
    }
}

/// Process-wide registry of schema logs, keyed by database name.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    logs: RwLock<HashMap<String, SchemaLog>>,
    index_defaults: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// Creates a registry with the given default index specifications.
    ///
    /// Keys are either a database name or `"db.store"`; the latter wins.
    pub fn new(index_defaults: BTreeMap<String, String>) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            index_defaults,
        }
    }

    /// Current version of `db`, or `None` if it was never opened.
    pub fn current_version(&self, db: &str) -> Option<u32> {
        self.logs.read().get(db).map(SchemaLog::current_version)
    }

    /// Schema of `db` at its current version.
    pub fn derived_schema(&self, db: &str) -> SchemaMap {
        self.logs
            .read()
            .get(db)
            .map(SchemaLog::derived)
            .unwrap_or_default()
    }

    /// Returns true if `store` exists at the current version of `db`.
    pub fn has_store(&self, db: &str, store: &str) -> bool {
        self.derived_schema(db).contains_key(store)
    }

    /// Returns a copy of the log of `db`.
    pub fn log(&self, db: &str) -> Option<SchemaLog> {
        self.logs.read().get(db).cloned()
    }

    /// Appends a declaration to the log of `db`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if `version` does not advance the log.
    pub fn declare(&self, db: &str, version: u32, stores: StoreChanges) -> CoreResult<()> {
        self.logs
            .write()
            .entry(db.to_string())
            .or_default()
            .declare(version, stores)
            .map_err(|message| CoreError::schema(db, message))
    }

    /// Removes the last declaration if it is `version`.
    ///
    /// Used to undo a declaration whose reopen failed.
    pub fn retract(&self, db: &str, version: u32) {
        if let Some(log) = self.logs.write().get_mut(db) {
            if log.current_version() == version {
                log.declarations.pop();
            }
        }
    }

    /// Replaces the log of `db` with a single declaration of `schema`.
    ///
    /// This is how the registry adopts an existing database it has no
    /// history for, from the store metadata of a live handle.
    pub fn seed(&self, db: &str, version: u32, schema: SchemaMap) {
        let stores = schema.into_iter().map(|(k, v)| (k, Some(v))).collect();
        let log = SchemaLog {
            declarations: vec![SchemaDeclaration { version, stores }],
        };
        tracing::debug!(db, version, "schema log seeded");
        self.logs.write().insert(db.to_string(), log);
    }

    /// Drops the log of `db`.
    pub fn forget(&self, db: &str) {
        self.logs.write().remove(db);
    }

    /// Index specification for a new store.
    ///
    /// Looks up `"db.store"`, then `"db"`, then falls back to
    /// [`FALLBACK_INDEX_SPEC`] with a warning.
    pub fn default_store_schema(&self, db: &str, store: &str) -> CoreResult<StoreSchema> {
        let specific = format!("{db}.{store}");
        let spec = match self
            .index_defaults
            .get(&specific)
            .or_else(|| self.index_defaults.get(db))
        {
            Some(spec) => spec.as_str(),
            None => {
                tracing::warn!(db, store, "no index specification configured, using '{FALLBACK_INDEX_SPEC}'");
                FALLBACK_INDEX_SPEC
            }
        };
        StoreSchema::parse(spec).map_err(|e| CoreError::schema(db, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(spec: &str) -> Option<StoreSchema> {
        Some(spec.parse().unwrap())
    }

    fn changes(pairs: Vec<(&str, Option<StoreSchema>)>) -> StoreChanges {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn derived_schema_is_union_of_versions() {
        let registry = SchemaRegistry::default();
        registry.declare("rates", 1, changes(vec![("a", def("++id"))])).unwrap();
        registry.declare("rates", 2, changes(vec![("b", def("++id, npa"))])).unwrap();

        let schema = registry.derived_schema("rates");
        assert_eq!(schema.len(), 2);
        assert!(schema.contains_key("a"));
        assert!(schema.contains_key("b"));
    }

    #[test]
    fn null_definition_deletes_store() {
        let registry = SchemaRegistry::default();
        registry.declare("rates", 1, changes(vec![("a", def("++id"))])).unwrap();
        registry.declare("rates", 2, changes(vec![("a", None)])).unwrap();

        assert!(!registry.has_store("rates", "a"));
        let log = registry.log("rates").unwrap();
        assert!(log.derived_at(1).contains_key("a"));
    }

    #[test]
    fn declare_must_advance_version() {
        let registry = SchemaRegistry::default();
        registry.declare("rates", 2, StoreChanges::new()).unwrap();

        let err = registry.declare("rates", 2, StoreChanges::new()).unwrap_err();
        assert!(matches!(err, CoreError::Schema { .. }));
        assert_eq!(registry.current_version("rates"), Some(2));
    }

    #[test]
    fn retract_undoes_last_declaration() {
        let registry = SchemaRegistry::default();
        registry.declare("rates", 1, StoreChanges::new()).unwrap();
        registry.declare("rates", 2, changes(vec![("a", def("++id"))])).unwrap();

        registry.retract("rates", 2);
        assert_eq!(registry.current_version("rates"), Some(1));
        assert!(!registry.has_store("rates", "a"));
    }

    #[test]
    fn seed_replaces_history() {
        let registry = SchemaRegistry::default();
        let mut schema = SchemaMap::new();
        schema.insert("lerg".into(), "++id, npa".parse().unwrap());

        registry.seed("rates", 7, schema);
        assert_eq!(registry.current_version("rates"), Some(7));
        assert!(registry.has_store("rates", "lerg"));
    }

    #[test]
    fn unknown_database_has_no_version() {
        let registry = SchemaRegistry::default();
        assert_eq!(registry.current_version("nope"), None);
        assert!(registry.derived_schema("nope").is_empty());
    }

    #[test]
    fn default_schema_lookup_order() {
        let mut defaults = BTreeMap::new();
        defaults.insert("rates".to_string(), "++id, npa".to_string());
        defaults.insert("rates.codes".to_string(), "npa".to_string());
        let registry = SchemaRegistry::new(defaults);

        assert_eq!(
            registry.default_store_schema("rates", "codes").unwrap().to_string(),
            "npa"
        );
        assert_eq!(
            registry.default_store_schema("rates", "other").unwrap().to_string(),
            "++id, npa"
        );
        assert_eq!(
            registry.default_store_schema("misc", "x").unwrap().to_string(),
            FALLBACK_INDEX_SPEC
        );
    }
}

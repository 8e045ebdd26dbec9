//! Store-level schema migration.
//!
//! Adding or removing a store bumps the database version:
//!
//! 1. take the migration latch exclusively (no `acquire` can interleave)
//! 2. close the handle
//! 3. declare `current + 1` in the [`SchemaRegistry`]
//! 4. reopen at the new version, which makes the engine apply it
//!
//! A failure at step 3 or 4 leaves the database closed and the registry
//! at the previous version, so the next attempt starts from a known state.
//! After a successful migration the handle stays open only if somebody
//! holds a reference to it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let migrator = Migrator::new(connections.clone(), notifier.clone());
//! assert!(migrator.ensure_store("rates", "lerg").await);
//! ```

use crate::connection::ConnectionManager;
use crate::error::{CoreError, CoreResult};
use crate::events::{ChangeEvent, ChangeNotifier};
use crate::registry::StoreChanges;
use ratedeck_storage::StoreSchema;
use std::sync::Arc;

/// What a migration call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The schema already matched; nothing changed.
    Unchanged,
    /// A new version was declared and opened.
    Applied {
        /// The version now in effect.
        version: u32,
    },
}

/// Adds and removes stores by declaring new schema versions.
pub struct Migrator {
    connections: Arc<ConnectionManager>,
    notifier: ChangeNotifier,
}

impl Migrator {
    /// Creates a migrator over `connections`.
    pub fn new(connections: Arc<ConnectionManager>, notifier: ChangeNotifier) -> Self {
        Self {
            connections,
            notifier,
        }
    }

    /// Ensures `store` exists in `db`; returns false if the migration failed.
    ///
    /// The failure is logged; use [`Migrator::try_ensure_store`] to get it.
    pub async fn ensure_store(&self, db: &str, store: &str) -> bool {
        match self.try_ensure_store(db, store).await {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(db, store, error = %err, "ensure_store failed");
                false
            }
        }
    }

    /// Ensures `store` exists in `db`, creating it with its default index
    /// specification.
    pub async fn try_ensure_store(&self, db: &str, store: &str) -> CoreResult<MigrationOutcome> {
        let registry = self.connections.registry();
        if registry.has_store(db, store) {
            return Ok(MigrationOutcome::Unchanged);
        }
        let schema = registry.default_store_schema(db, store)?;
        self.migrate(db, store, Some(schema)).await
    }

    /// Ensures `store` exists in `db` with an explicit definition.
    ///
    /// An existing store is left as is, even if its definition differs.
    pub async fn ensure_store_with(
        &self,
        db: &str,
        store: &str,
        schema: StoreSchema,
    ) -> CoreResult<MigrationOutcome> {
        if self.connections.registry().has_store(db, store) {
            return Ok(MigrationOutcome::Unchanged);
        }
        self.migrate(db, store, Some(schema)).await
    }

    /// Removes `store` from `db`; returns false if the migration failed.
    pub async fn drop_store(&self, db: &str, store: &str) -> bool {
        match self.try_drop_store(db, store).await {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(db, store, error = %err, "drop_store failed");
                false
            }
        }
    }

    /// Removes `store` from `db`. Absent stores are a no-op.
    pub async fn try_drop_store(&self, db: &str, store: &str) -> CoreResult<MigrationOutcome> {
        let registry = self.connections.registry();
        if registry.current_version(db).is_some() && !registry.has_store(db, store) {
            return Ok(MigrationOutcome::Unchanged);
        }
        self.migrate(db, store, None).await
    }

    /// Lists differences between the registry and the live handle of `db`.
    ///
    /// Empty when they agree or when `db` is not open.
    pub fn schema_drift(&self, db: &str) -> Vec<String> {
        let engine = self.connections.engine();
        if !engine.is_open(db) {
            return Vec::new();
        }
        let live = engine.introspect(db);
        let logged = self.connections.registry().derived_schema(db);

        let mut drift = Vec::new();
        for (name, schema) in &logged {
            match live.get(name) {
                None => drift.push(format!("store '{name}' missing from live handle")),
                Some(l) if l != schema => {
                    drift.push(format!("store '{name}' is '{l}', expected '{schema}'"))
                }
                Some(_) => {}
            }
        }
        for name in live.keys().filter(|n| !logged.contains_key(*n)) {
            drift.push(format!("store '{name}' not in schema log"));
        }
        drift
    }

    /// Deletes `db` with every store and every version.
    ///
    /// Outstanding borrowers see a closed database; the next `acquire`
    /// creates it afresh at version 1.
    pub async fn delete_database(&self, db: &str) -> CoreResult<()> {
        let slot = self.connections.slot(db);
        let _exclusive = slot.migration_latch().write().await;

        slot.set_migrating(true);
        self.connections.close_for_migration(&slot);
        slot.invalidate_references();
        let result = self.connections.engine().delete_database(db).await;
        self.connections.registry().forget(db);
        slot.set_migrating(false);

        result.map_err(|e| CoreError::schema(db, e.to_string()))?;
        tracing::info!(db, "database deleted");
        self.notifier.publish(ChangeEvent::DatabaseDeleted { db: db.to_string() });
        Ok(())
    }

    async fn migrate(
        &self,
        db: &str,
        store: &str,
        definition: Option<StoreSchema>,
    ) -> CoreResult<MigrationOutcome> {
        let registry = self.connections.registry();
        let slot = self.connections.slot(db);
        let _exclusive = slot.migration_latch().write().await;

        // The database must have been opened once so the log has a base.
        if registry.current_version(db).is_none() {
            self.connections.ensure_open(&slot).await?;
        }

        // Another migration may have done our work while we waited.
        let present = registry.has_store(db, store);
        if present == definition.is_some() {
            self.connections.close_if_idle(&slot);
            return Ok(MigrationOutcome::Unchanged);
        }

        let current = registry.current_version(db).unwrap_or(0);
        let next = current + 1;
        let mut changes = StoreChanges::new();
        changes.insert(store.to_string(), definition);

        slot.set_migrating(true);
        self.connections.close_for_migration(&slot);

        let result = match registry.declare(db, next, changes) {
            Ok(()) => match self.connections.ensure_open(&slot).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    registry.retract(db, next);
                    self.connections.close_for_migration(&slot);
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };
        slot.set_migrating(false);
        // Borrowers that released mid-migration left the count at zero.
        self.connections.close_if_idle(&slot);

        match result {
            Ok(()) => {
                tracing::info!(db, store, version = next, "schema migrated");
                self.notifier.publish(ChangeEvent::SchemaChanged {
                    db: db.to_string(),
                    version: next,
                });
                Ok(MigrationOutcome::Applied { version: next })
            }
            Err(err) => {
                tracing::error!(db, store, version = next, error = %err, "schema migration failed");
                Err(match err {
                    CoreError::Schema { .. } => err,
                    other => CoreError::schema(db, other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use crate::registry::SchemaRegistry;
    use ratedeck_storage::{InMemoryEngine, StorageEngine};
    use serde_json::json;

    fn setup() -> (Arc<InMemoryEngine>, Arc<ConnectionManager>, Migrator) {
        let engine = Arc::new(InMemoryEngine::new());
        let connections = Arc::new(ConnectionManager::new(
            engine.clone(),
            Arc::new(SchemaRegistry::default()),
            RetryPolicy::no_retry(),
        ));
        let migrator = Migrator::new(connections.clone(), ChangeNotifier::default());
        (engine, connections, migrator)
    }

    #[tokio::test]
    async fn ensure_store_bumps_version_once() {
        let (engine, connections, migrator) = setup();
        connections.lease("rates").await.unwrap();

        let first = migrator.try_ensure_store("rates", "lerg").await.unwrap();
        let second = migrator.try_ensure_store("rates", "lerg").await.unwrap();

        assert_eq!(first, MigrationOutcome::Applied { version: 2 });
        assert_eq!(second, MigrationOutcome::Unchanged);
        assert_eq!(engine.version("rates"), Some(2));
    }

    #[tokio::test]
    async fn ensure_store_opens_unknown_database() {
        let (engine, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "lerg").await);
        assert_eq!(engine.version("rates"), Some(2));

        let lease = connections.lease("rates").await.unwrap();
        assert!(lease.introspect().contains_key("lerg"));
    }

    #[tokio::test]
    async fn standalone_migration_leaves_no_idle_handle() {
        let (engine, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "lerg").await);
        assert!(!engine.is_open("rates"));
        assert_eq!(connections.ref_count("rates"), 0);

        assert!(migrator.drop_store("rates", "lerg").await);
        assert!(!engine.is_open("rates"));
        assert_eq!(engine.close_count(), engine.open_count());
    }

    #[tokio::test]
    async fn migration_keeps_handle_for_borrowers() {
        let (engine, connections, migrator) = setup();
        let lease = connections.lease("rates").await.unwrap();

        assert!(migrator.ensure_store("rates", "lerg").await);
        assert!(lease.is_open());
        assert_eq!(connections.ref_count("rates"), 1);

        drop(lease);
        assert!(!engine.is_open("rates"));
    }

    #[tokio::test]
    async fn release_during_migration_closes_afterwards() {
        let (engine, connections, migrator) = setup();
        let lease = connections.lease("rates").await.unwrap();
        let slot = connections.slot("rates");

        // A release that lands while the migration flag is up must not close.
        slot.set_migrating(true);
        drop(lease);
        assert!(engine.is_open("rates"));
        slot.set_migrating(false);

        assert!(migrator.ensure_store("rates", "lerg").await);
        assert!(!engine.is_open("rates"));
        assert_eq!(connections.ref_count("rates"), 0);
    }

    #[tokio::test]
    async fn delete_database_orphans_old_leases() {
        let (engine, connections, migrator) = setup();
        let old = connections.lease("rates").await.unwrap();

        migrator.delete_database("rates").await.unwrap();
        let fresh = connections.lease("rates").await.unwrap();
        drop(old);

        assert_eq!(connections.ref_count("rates"), 1);
        assert!(fresh.is_open());
        assert!(engine.is_open("rates"));
    }

    #[tokio::test]
    async fn ensured_store_round_trips() {
        let (_, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "codes").await);

        let lease = connections.lease("rates").await.unwrap();
        lease
            .put_batch("codes", vec![json!({"npa": "201"})])
            .await
            .unwrap();
        let rows = lease
            .scan("codes", ratedeck_storage::ScanRequest::all())
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"npa": "201", "id": 1})]);
    }

    #[tokio::test]
    async fn drop_store_removes_and_is_idempotent() {
        let (engine, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "lerg").await);
        assert!(migrator.drop_store("rates", "lerg").await);
        assert!(migrator.drop_store("rates", "lerg").await);

        assert_eq!(engine.version("rates"), Some(3));
        let lease = connections.lease("rates").await.unwrap();
        assert!(lease.introspect().is_empty());
        assert!(!connections.registry().has_store("rates", "lerg"));
    }

    #[tokio::test]
    async fn migration_preserves_other_stores() {
        let (_, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "a").await);
        {
            let lease = connections.lease("rates").await.unwrap();
            lease.put_batch("a", vec![json!({"x": 1})]).await.unwrap();
        }
        assert!(migrator.ensure_store("rates", "b").await);

        let lease = connections.lease("rates").await.unwrap();
        assert_eq!(lease.count("a", None).await.unwrap(), 1);
        assert!(migrator.schema_drift("rates").is_empty());
    }

    #[tokio::test]
    async fn invalid_default_spec_fails_cleanly() {
        let engine = Arc::new(InMemoryEngine::new());
        let mut defaults = std::collections::BTreeMap::new();
        defaults.insert("rates".to_string(), "++id, ,".to_string());
        let connections = Arc::new(ConnectionManager::new(
            engine.clone(),
            Arc::new(SchemaRegistry::new(defaults)),
            RetryPolicy::no_retry(),
        ));
        let migrator = Migrator::new(connections.clone(), ChangeNotifier::default());

        assert!(!migrator.ensure_store("rates", "lerg").await);
        assert_eq!(connections.registry().current_version("rates"), None);
    }

    #[tokio::test]
    async fn delete_database_resets_history() {
        let (engine, connections, migrator) = setup();
        assert!(migrator.ensure_store("rates", "lerg").await);

        migrator.delete_database("rates").await.unwrap();
        assert_eq!(engine.version("rates"), None);
        assert_eq!(connections.registry().current_version("rates"), None);

        connections.lease("rates").await.unwrap();
        assert_eq!(engine.version("rates"), Some(1));
        assert!(!connections.registry().has_store("rates", "lerg"));
    }

    #[tokio::test]
    async fn migration_publishes_event() {
        let (_, connections, _) = setup();
        let notifier = ChangeNotifier::default();
        let mut rx = notifier.subscribe();
        let migrator = Migrator::new(connections, notifier);

        migrator.try_ensure_store("rates", "lerg").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ChangeEvent::SchemaChanged {
                db: "rates".into(),
                version: 2
            }
        );
    }
}

//! Schema definitions and migration runner for SurrealDB.
//!
//! All tables are SCHEMAFULL. UUIDs are stored as strings; the parent of a
//! root node is stored as the `"0"` sentinel. SurrealDB has no partial
//! indexes, so "unique among live rows" is expressed with helper columns:
//!
//! - `organization.tombstone` is `''` while the row is live and the row id
//!   once soft-deleted;
//! - `organization.code_key` is the code when present and the row id
//!   otherwise;
//! - `membership.primary_slot` is the user id on the primary edge and the
//!   edge id on auxiliary edges.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

pub(crate) const IDX_ORG_SIBLING_NAME: &str = "idx_organization_sibling_name";
pub(crate) const IDX_ORG_CODE: &str = "idx_organization_code";
pub(crate) const IDX_MEMBERSHIP_USER_DEPT: &str = "idx_membership_user_dept";
pub(crate) const IDX_MEMBERSHIP_PRIMARY: &str = "idx_membership_primary_slot";

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "organization_directory",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Organization nodes
-- =======================================================================
DEFINE TABLE organization SCHEMAFULL;
DEFINE FIELD parent_id ON TABLE organization TYPE string;
DEFINE FIELD name ON TABLE organization TYPE string \
    ASSERT string::len($value) > 0;
DEFINE FIELD code ON TABLE organization TYPE option<string>;
DEFINE FIELD code_key ON TABLE organization TYPE string;
DEFINE FIELD ancestors ON TABLE organization TYPE string \
    ASSERT $value = '0' OR string::starts_with($value, '0,');
DEFINE FIELD sort_order ON TABLE organization TYPE int DEFAULT 0;
DEFINE FIELD leader_id ON TABLE organization TYPE option<string>;
DEFINE FIELD kind ON TABLE organization TYPE int \
    ASSERT $value IN [1, 2, 3];
DEFINE FIELD status ON TABLE organization TYPE string \
    ASSERT $value IN ['Enabled', 'Disabled'];
DEFINE FIELD description ON TABLE organization TYPE option<string>;
DEFINE FIELD tombstone ON TABLE organization TYPE string DEFAULT '';
DEFINE FIELD created_at ON TABLE organization TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE organization TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD deleted_at ON TABLE organization TYPE option<datetime>;
DEFINE INDEX idx_organization_sibling_name ON TABLE organization \
    COLUMNS parent_id, name, tombstone UNIQUE;
DEFINE INDEX idx_organization_code ON TABLE organization \
    COLUMNS code_key, tombstone UNIQUE;
DEFINE INDEX idx_organization_parent ON TABLE organization \
    COLUMNS parent_id;
DEFINE INDEX idx_organization_ancestors ON TABLE organization \
    COLUMNS ancestors;
DEFINE INDEX idx_organization_deleted_at ON TABLE organization \
    COLUMNS deleted_at;

-- =======================================================================
-- Membership edges (user -> department)
-- =======================================================================
DEFINE TABLE membership SCHEMAFULL;
DEFINE FIELD user_id ON TABLE membership TYPE string;
DEFINE FIELD dept_id ON TABLE membership TYPE string;
DEFINE FIELD is_primary ON TABLE membership TYPE bool DEFAULT false;
DEFINE FIELD primary_slot ON TABLE membership TYPE string;
DEFINE FIELD created_at ON TABLE membership TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_membership_user_dept ON TABLE membership \
    COLUMNS user_id, dept_id UNIQUE;
DEFINE INDEX idx_membership_primary_slot ON TABLE membership \
    COLUMNS primary_slot UNIQUE;
DEFINE INDEX idx_membership_dept ON TABLE membership \
    COLUMNS dept_id;

-- =======================================================================
-- Audit events (append-only)
-- =======================================================================
DEFINE TABLE audit_event SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD action ON TABLE audit_event TYPE string \
    ASSERT $value IN ['create', 'update', 'move', 'delete', \
    'set_primary', 'add_aux', 'remove_aux', 'reset_password', \
    'unlock', 'batch_update_status'];
DEFINE FIELD actor_id ON TABLE audit_event TYPE string;
DEFINE FIELD actor_name ON TABLE audit_event TYPE string;
DEFINE FIELD target_id ON TABLE audit_event TYPE string;
DEFINE FIELD changes ON TABLE audit_event TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_event TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_event_target ON TABLE audit_event \
    COLUMNS target_id, timestamp;
DEFINE INDEX idx_audit_event_timestamp ON TABLE audit_event \
    COLUMNS timestamp;
";

/// Run all pending migrations against the database.
///
/// Creates a `_migration` tracking table on first run, then applies
/// every migration newer than the recorded version. Safe to call on
/// every start-up.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT version FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql).await?.check().map_err(|e| {
            DbError::Migration(format!(
                "Migration v{} '{}' failed: {}",
                migration.version, migration.name, e,
            ))
        })?;

        db.query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

        info!(version = migration.version, "Migration applied");
    }

    Ok(())
}

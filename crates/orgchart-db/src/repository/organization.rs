//! SurrealDB implementation of [`OrganizationRepository`].

use chrono::{DateTime, Utc};
use orgchart_core::error::{OrgChartError, OrgChartResult};
use orgchart_core::ids;
use orgchart_core::models::organization::{
    NewOrganization, OrgKind, OrgStatus, Organization, SubtreeMove, UpdateOrganization,
};
use orgchart_core::repository::OrganizationRepository;
use orgchart_core::tree;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::{CountRow, parse_opt_uuid, parse_uuid};
use crate::error::DbError;
use crate::schema::{IDX_ORG_CODE, IDX_ORG_SIBLING_NAME};

const ENTITY: &str = "organization";

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct OrganizationRow {
    parent_id: String,
    name: String,
    code: Option<String>,
    ancestors: String,
    sort_order: i64,
    leader_id: Option<String>,
    kind: i64,
    status: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct OrganizationRowWithId {
    record_id: String,
    parent_id: String,
    name: String,
    code: Option<String>,
    ancestors: String,
    sort_order: i64,
    leader_id: Option<String>,
    kind: i64,
    status: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

fn parse_status(s: &str) -> Result<OrgStatus, DbError> {
    match s {
        "Enabled" => Ok(OrgStatus::Enabled),
        "Disabled" => Ok(OrgStatus::Disabled),
        other => Err(DbError::Decode(format!("unknown organization status: {other}"))),
    }
}

impl OrganizationRow {
    fn into_organization(self, id: Uuid) -> Result<Organization, DbError> {
        let parent_id = ids::parse_parent(&self.parent_id)
            .map_err(|e| DbError::Decode(format!("invalid parent reference: {e}")))?;
        Ok(Organization {
            id,
            parent_id,
            name: self.name,
            code: self.code,
            ancestors: self.ancestors,
            sort_order: self.sort_order,
            leader_id: parse_opt_uuid(self.leader_id.as_deref(), "leader")?,
            kind: OrgKind::from_code(self.kind).map_err(|e| DbError::Decode(e.to_string()))?,
            status: parse_status(&self.status)?,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

impl OrganizationRowWithId {
    fn try_into_organization(self) -> Result<Organization, DbError> {
        let id = parse_uuid(&self.record_id, "organization")?;
        OrganizationRow {
            parent_id: self.parent_id,
            name: self.name,
            code: self.code,
            ancestors: self.ancestors,
            sort_order: self.sort_order,
            leader_id: self.leader_id,
            kind: self.kind,
            status: self.status,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
        .into_organization(id)
    }
}

fn collect(rows: Vec<OrganizationRowWithId>) -> Result<Vec<Organization>, DbError> {
    rows.into_iter()
        .map(OrganizationRowWithId::try_into_organization)
        .collect()
}

/// Empty codes are stored as absent.
fn normalize_code(code: Option<String>) -> Option<String> {
    code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty())
}

/// Map a unique-index violation to the domain conflict it stands for.
fn write_error(err: DbError, name: Option<&str>, code: Option<&str>) -> OrgChartError {
    match err.unique_index() {
        Some(IDX_ORG_SIBLING_NAME) => OrgChartError::NameConflict {
            name: name.unwrap_or_default().to_string(),
        },
        Some(IDX_ORG_CODE) => OrgChartError::CodeConflict {
            code: code.unwrap_or_default().to_string(),
        },
        _ => err.into(),
    }
}

/// SurrealDB implementation of the organization repository.
#[derive(Clone)]
pub struct SurrealOrganizationRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealOrganizationRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select_many(
        &self,
        query: &str,
        binds: Vec<(&'static str, String)>,
    ) -> Result<Vec<Organization>, DbError> {
        let mut builder = self.db.query(query);
        for bind in binds {
            builder = builder.bind(bind);
        }
        let mut result = builder.await?;
        let rows: Vec<OrganizationRowWithId> = result.take(0)?;
        collect(rows)
    }

    async fn count(&self, query: &str, key: &'static str, value: String) -> Result<u64, DbError> {
        let mut result = self.db.query(query).bind((key, value)).await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}

impl<C: Connection> OrganizationRepository for SurrealOrganizationRepository<C> {
    async fn insert(&self, input: NewOrganization) -> OrgChartResult<Organization> {
        let id = ids::new_id();
        let id_str = id.to_string();
        let code = normalize_code(input.code);
        let code_key = code.clone().unwrap_or_else(|| id_str.clone());

        let result = self
            .db
            .query(
                "CREATE type::record('organization', $id) SET \
                 parent_id = $parent_id, name = $name, \
                 code = $code, code_key = $code_key, \
                 ancestors = $ancestors, sort_order = $sort_order, \
                 leader_id = $leader_id, kind = $kind, status = $status, \
                 description = $description, tombstone = ''",
            )
            .bind(("id", id_str.clone()))
            .bind(("parent_id", ids::parent_to_string(input.parent_id)))
            .bind(("name", input.name.clone()))
            .bind(("code", code.clone()))
            .bind(("code_key", code_key))
            .bind(("ancestors", input.ancestors))
            .bind(("sort_order", input.sort_order))
            .bind(("leader_id", input.leader_id.map(|l| l.to_string())))
            .bind(("kind", input.kind.code()))
            .bind(("status", input.status.as_str().to_string()))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| write_error(DbError::from_check(e), Some(&input.name), code.as_deref()))?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(ENTITY, &id_str))?;

        debug!(organization_id = %id, "Organization row created");
        Ok(row.into_organization(id)?)
    }

    async fn find(&self, id: Uuid) -> OrgChartResult<Organization> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('organization', $id) \
                 WHERE deleted_at IS NONE",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(ENTITY, &id_str))?;

        Ok(row.into_organization(id)?)
    }

    async fn find_by_code(&self, code: &str) -> OrgChartResult<Option<Organization>> {
        let found = self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM organization \
                 WHERE code = $code AND deleted_at IS NONE LIMIT 1",
                vec![("code", code.trim().to_string())],
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn find_by_parent_and_name(
        &self,
        parent_id: Option<Uuid>,
        name: &str,
    ) -> OrgChartResult<Option<Organization>> {
        let found = self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM organization \
                 WHERE parent_id = $parent_id AND name = $name \
                 AND deleted_at IS NONE LIMIT 1",
                vec![
                    ("parent_id", ids::parent_to_string(parent_id)),
                    ("name", name.to_string()),
                ],
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn update(&self, id: Uuid, input: UpdateOrganization) -> OrgChartResult<Organization> {
        let id_str = id.to_string();

        let code = input.code.map(normalize_code);
        let leader_id = input.leader_id;
        let description = input
            .description
            .map(|d| d.filter(|text| !text.trim().is_empty()));

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        match &code {
            Some(Some(_)) => sets.push("code = $code, code_key = $code"),
            Some(None) => sets.push("code = NONE, code_key = $id"),
            None => {}
        }
        match &leader_id {
            Some(Some(_)) => sets.push("leader_id = $leader_id"),
            Some(None) => sets.push("leader_id = NONE"),
            None => {}
        }
        match &description {
            Some(Some(_)) => sets.push("description = $description"),
            Some(None) => sets.push("description = NONE"),
            None => {}
        }
        if input.sort_order.is_some() {
            sets.push("sort_order = $sort_order");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('organization', $id) SET {} \
             WHERE deleted_at IS NONE",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(name) = input.name.clone() {
            builder = builder.bind(("name", name));
        }
        if let Some(Some(code)) = code.clone() {
            builder = builder.bind(("code", code));
        }
        if let Some(Some(leader)) = leader_id {
            builder = builder.bind(("leader_id", leader.to_string()));
        }
        if let Some(Some(description)) = description {
            builder = builder.bind(("description", description));
        }
        if let Some(sort_order) = input.sort_order {
            builder = builder.bind(("sort_order", sort_order));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str().to_string()));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result.check().map_err(|e| {
            write_error(
                DbError::from_check(e),
                input.name.as_deref(),
                code.as_ref().and_then(|c| c.as_deref()),
            )
        })?;

        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(ENTITY, &id_str))?;

        Ok(row.into_organization(id)?)
    }

    async fn apply_move(&self, plan: SubtreeMove) -> OrgChartResult<Organization> {
        let moved = self.find(plan.id).await?;
        let id_str = plan.id.to_string();
        let rewrites: Vec<serde_json::Value> = plan
            .descendants
            .iter()
            .map(|r| serde_json::json!({ "id": r.id.to_string(), "ancestors": r.ancestors }))
            .collect();
        let rewrite_count = rewrites.len();

        // The node update and every descendant rewrite commit together.
        let result = self
            .db
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE type::record('organization', $id) SET \
                 parent_id = $parent_id, ancestors = $ancestors, \
                 updated_at = time::now() \
                 WHERE deleted_at IS NONE; \
                 FOR $rewrite IN $rewrites { \
                     UPDATE type::record('organization', $rewrite.id) SET \
                     ancestors = $rewrite.ancestors, updated_at = time::now() \
                     WHERE deleted_at IS NONE; \
                 }; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id_str))
            .bind(("parent_id", ids::parent_to_string(plan.parent_id)))
            .bind(("ancestors", plan.ancestors))
            .bind(("rewrites", serde_json::Value::Array(rewrites)))
            .await
            .map_err(DbError::from)?;

        result
            .check()
            .map_err(|e| write_error(DbError::from_check(e), Some(&moved.name), None))?;

        debug!(
            organization_id = %plan.id,
            descendants = rewrite_count,
            "Sub-tree relocated"
        );
        self.find(plan.id).await
    }

    async fn soft_delete(&self, id: Uuid) -> OrgChartResult<()> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('organization', $id) SET \
                 deleted_at = time::now(), tombstone = $id, \
                 updated_at = time::now() \
                 WHERE deleted_at IS NONE",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<OrganizationRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(DbError::not_found(ENTITY, id_str).into());
        }
        Ok(())
    }

    async fn find_tree(&self, status: Option<OrgStatus>) -> OrgChartResult<Vec<Organization>> {
        let nodes = match status {
            Some(status) => {
                self.select_many(
                    "SELECT meta::id(id) AS record_id, * FROM organization \
                     WHERE deleted_at IS NONE AND status = $status \
                     ORDER BY sort_order ASC, id ASC",
                    vec![("status", status.as_str().to_string())],
                )
                .await?
            }
            None => {
                self.select_many(
                    "SELECT meta::id(id) AS record_id, * FROM organization \
                     WHERE deleted_at IS NONE \
                     ORDER BY sort_order ASC, id ASC",
                    Vec::new(),
                )
                .await?
            }
        };
        debug!(count = nodes.len(), "Loaded organization tree");
        Ok(nodes)
    }

    async fn find_children(&self, parent_id: Option<Uuid>) -> OrgChartResult<Vec<Organization>> {
        Ok(self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM organization \
                 WHERE parent_id = $parent_id AND deleted_at IS NONE \
                 ORDER BY sort_order ASC, id ASC",
                vec![("parent_id", ids::parent_to_string(parent_id))],
            )
            .await?)
    }

    async fn find_subtree(&self, root_id: Uuid) -> OrgChartResult<Vec<Organization>> {
        Ok(self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM organization \
                 WHERE deleted_at IS NONE AND ( \
                     id = type::record('organization', $id) \
                     OR string::split(ancestors, ',') CONTAINS $id \
                 ) \
                 ORDER BY sort_order ASC, id ASC",
                vec![("id", root_id.to_string())],
            )
            .await?)
    }

    async fn has_children(&self, id: Uuid) -> OrgChartResult<bool> {
        let total = self
            .count(
                "SELECT count() AS total FROM organization \
                 WHERE parent_id = $id AND deleted_at IS NONE GROUP ALL",
                "id",
                id.to_string(),
            )
            .await?;
        Ok(total > 0)
    }

    async fn count_members(&self, dept_id: Uuid) -> OrgChartResult<u64> {
        Ok(self
            .count(
                "SELECT count() AS total FROM membership \
                 WHERE dept_id = $dept_id GROUP ALL",
                "dept_id",
                dept_id.to_string(),
            )
            .await?)
    }

    async fn is_descendant(&self, ancestor_id: Uuid, candidate_id: Uuid) -> OrgChartResult<bool> {
        if ancestor_id == candidate_id {
            return Ok(false);
        }
        match self.find(candidate_id).await {
            Ok(candidate) => Ok(tree::is_descendant(ancestor_id, &candidate)),
            Err(OrgChartError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_codes_are_dropped() {
        assert_eq!(normalize_code(Some("  ".into())), None);
        assert_eq!(normalize_code(Some(" ENG ".into())), Some("ENG".into()));
        assert_eq!(normalize_code(None), None);
    }

    #[test]
    fn index_violations_map_to_domain_conflicts() {
        let name = DbError::UniqueViolation {
            index: IDX_ORG_SIBLING_NAME.into(),
            detail: String::new(),
        };
        assert!(matches!(
            write_error(name, Some("Eng"), None),
            OrgChartError::NameConflict { name } if name == "Eng"
        ));

        let code = DbError::UniqueViolation {
            index: IDX_ORG_CODE.into(),
            detail: String::new(),
        };
        assert!(matches!(
            write_error(code, None, Some("ENG")),
            OrgChartError::CodeConflict { code } if code == "ENG"
        ));
    }
}

//! SurrealDB implementation of [`MembershipRepository`].
//!
//! "At most one primary edge per user" is enforced by the unique
//! `primary_slot` column: the primary edge stores the user id there,
//! auxiliary edges store their own id.

use chrono::{DateTime, Utc};
use orgchart_core::error::{OrgChartError, OrgChartResult};
use orgchart_core::ids;
use orgchart_core::models::membership::{MemberFilter, Membership, NewMembership};
use orgchart_core::repository::MembershipRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::{CountRow, parse_uuid};
use crate::error::DbError;
use crate::schema::{IDX_MEMBERSHIP_PRIMARY, IDX_MEMBERSHIP_USER_DEPT};

const ENTITY: &str = "membership";

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct MembershipRow {
    user_id: String,
    dept_id: String,
    is_primary: bool,
    created_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct MembershipRowWithId {
    record_id: String,
    user_id: String,
    dept_id: String,
    is_primary: bool,
    created_at: DateTime<Utc>,
}

impl MembershipRow {
    fn into_membership(self, id: Uuid) -> Result<Membership, DbError> {
        Ok(Membership {
            id,
            user_id: parse_uuid(&self.user_id, "user")?,
            dept_id: parse_uuid(&self.dept_id, "department")?,
            is_primary: self.is_primary,
            created_at: self.created_at,
        })
    }
}

impl MembershipRowWithId {
    fn try_into_membership(self) -> Result<Membership, DbError> {
        Ok(Membership {
            id: parse_uuid(&self.record_id, "membership")?,
            user_id: parse_uuid(&self.user_id, "user")?,
            dept_id: parse_uuid(&self.dept_id, "department")?,
            is_primary: self.is_primary,
            created_at: self.created_at,
        })
    }
}

fn collect(rows: Vec<MembershipRowWithId>) -> Result<Vec<Membership>, DbError> {
    rows.into_iter()
        .map(MembershipRowWithId::try_into_membership)
        .collect()
}

fn write_error(err: DbError, user_id: Uuid, dept_id: Uuid) -> OrgChartError {
    match err.unique_index() {
        Some(IDX_MEMBERSHIP_USER_DEPT) => OrgChartError::Conflict {
            reason: format!("user {user_id} is already linked to department {dept_id}"),
        },
        Some(IDX_MEMBERSHIP_PRIMARY) => OrgChartError::Conflict {
            reason: format!("user {user_id} already has a primary department"),
        },
        _ => err.into(),
    }
}

/// SurrealDB implementation of the membership repository.
#[derive(Clone)]
pub struct SurrealMembershipRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealMembershipRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_edge(&self, user_id: Uuid, dept_id: Uuid) -> Result<Option<Membership>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE user_id = $user_id AND dept_id = $dept_id LIMIT 1",
            )
            .bind(("user_id", user_id.to_string()))
            .bind(("dept_id", dept_id.to_string()))
            .await?;
        let rows: Vec<MembershipRowWithId> = result.take(0)?;
        Ok(collect(rows)?.into_iter().next())
    }

    async fn select_by_user(
        &self,
        user_id: Uuid,
        primary: Option<bool>,
    ) -> Result<Vec<Membership>, DbError> {
        let query = match primary {
            Some(_) => {
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE user_id = $user_id AND is_primary = $is_primary \
                 ORDER BY created_at ASC"
            }
            None => {
                "SELECT meta::id(id) AS record_id, * FROM membership \
                 WHERE user_id = $user_id \
                 ORDER BY is_primary DESC, created_at ASC"
            }
        };
        let mut builder = self.db.query(query).bind(("user_id", user_id.to_string()));
        if let Some(flag) = primary {
            builder = builder.bind(("is_primary", flag));
        }
        let mut result = builder.await?;
        let rows: Vec<MembershipRowWithId> = result.take(0)?;
        collect(rows)
    }
}

impl<C: Connection> MembershipRepository for SurrealMembershipRepository<C> {
    async fn insert(&self, input: NewMembership) -> OrgChartResult<Membership> {
        let id = ids::new_id();
        let id_str = id.to_string();
        let user_str = input.user_id.to_string();
        let primary_slot = if input.is_primary {
            user_str.clone()
        } else {
            id_str.clone()
        };

        let result = self
            .db
            .query(
                "CREATE type::record('membership', $id) SET \
                 user_id = $user_id, dept_id = $dept_id, \
                 is_primary = $is_primary, primary_slot = $primary_slot",
            )
            .bind(("id", id_str.clone()))
            .bind(("user_id", user_str))
            .bind(("dept_id", input.dept_id.to_string()))
            .bind(("is_primary", input.is_primary))
            .bind(("primary_slot", primary_slot))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| write_error(DbError::from_check(e), input.user_id, input.dept_id))?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(ENTITY, &id_str))?;

        Ok(row.into_membership(id)?)
    }

    async fn find(&self, id: Uuid) -> OrgChartResult<Membership> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('membership', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DbError::not_found(ENTITY, &id_str))?;

        Ok(row.into_membership(id)?)
    }

    async fn delete(&self, id: Uuid) -> OrgChartResult<()> {
        let id_str = id.to_string();

        let result = self
            .db
            .query("DELETE type::record('membership', $id) RETURN BEFORE")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let mut result = result.check().map_err(DbError::from_check)?;
        let rows: Vec<MembershipRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(DbError::not_found(ENTITY, id_str).into());
        }
        Ok(())
    }

    async fn find_by_user(&self, user_id: Uuid) -> OrgChartResult<Vec<Membership>> {
        Ok(self.select_by_user(user_id, None).await?)
    }

    async fn find_primary(&self, user_id: Uuid) -> OrgChartResult<Option<Membership>> {
        Ok(self
            .select_by_user(user_id, Some(true))
            .await?
            .into_iter()
            .next())
    }

    async fn find_auxiliary(&self, user_id: Uuid) -> OrgChartResult<Vec<Membership>> {
        Ok(self.select_by_user(user_id, Some(false)).await?)
    }

    async fn find_users_in(
        &self,
        dept_id: Uuid,
        filter: MemberFilter,
    ) -> OrgChartResult<Vec<Membership>> {
        self.find_users_in_any(vec![dept_id], filter).await
    }

    async fn find_users_in_any(
        &self,
        dept_ids: Vec<Uuid>,
        filter: MemberFilter,
    ) -> OrgChartResult<Vec<Membership>> {
        if dept_ids.is_empty() {
            return Ok(Vec::new());
        }
        let dept_ids: Vec<String> = dept_ids.iter().map(Uuid::to_string).collect();
        let flag = filter.primary_flag();

        let query = if flag.is_some() {
            "SELECT meta::id(id) AS record_id, * FROM membership \
             WHERE dept_id IN $dept_ids AND is_primary = $is_primary \
             ORDER BY created_at ASC"
        } else {
            "SELECT meta::id(id) AS record_id, * FROM membership \
             WHERE dept_id IN $dept_ids \
             ORDER BY created_at ASC"
        };

        let mut builder = self.db.query(query).bind(("dept_ids", dept_ids));
        if let Some(flag) = flag {
            builder = builder.bind(("is_primary", flag));
        }
        let mut result = builder.await.map_err(DbError::from)?;
        let rows: Vec<MembershipRowWithId> = result.take(0).map_err(DbError::from)?;
        Ok(collect(rows)?)
    }

    async fn count_in(&self, dept_id: Uuid, filter: MemberFilter) -> OrgChartResult<u64> {
        let flag = filter.primary_flag();
        let query = if flag.is_some() {
            "SELECT count() AS total FROM membership \
             WHERE dept_id = $dept_id AND is_primary = $is_primary GROUP ALL"
        } else {
            "SELECT count() AS total FROM membership \
             WHERE dept_id = $dept_id GROUP ALL"
        };

        let mut builder = self.db.query(query).bind(("dept_id", dept_id.to_string()));
        if let Some(flag) = flag {
            builder = builder.bind(("is_primary", flag));
        }
        let mut result = builder.await.map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    async fn set_primary(&self, user_id: Uuid, dept_id: Uuid) -> OrgChartResult<bool> {
        let edges = self.select_by_user(user_id, None).await?;
        let current = edges.iter().find(|e| e.is_primary);
        let target = edges.iter().find(|e| e.dept_id == dept_id);

        if target.is_some_and(|t| t.is_primary) {
            return Ok(false);
        }

        let user_str = user_id.to_string();
        let mut statements = vec!["BEGIN TRANSACTION;"];
        if current.is_some() {
            statements.push(
                "UPDATE type::record('membership', $demote_id) SET \
                 is_primary = false, primary_slot = $demote_id;",
            );
        }
        if target.is_some() {
            statements.push(
                "UPDATE type::record('membership', $promote_id) SET \
                 is_primary = true, primary_slot = $user_id;",
            );
        } else {
            statements.push(
                "CREATE type::record('membership', $promote_id) SET \
                 user_id = $user_id, dept_id = $dept_id, \
                 is_primary = true, primary_slot = $user_id;",
            );
        }
        statements.push("COMMIT TRANSACTION;");

        let promote_id = target.map_or_else(ids::new_id, |t| t.id);
        let mut builder = self
            .db
            .query(statements.join(" "))
            .bind(("user_id", user_str))
            .bind(("dept_id", dept_id.to_string()))
            .bind(("promote_id", promote_id.to_string()));
        if let Some(current) = current {
            builder = builder.bind(("demote_id", current.id.to_string()));
        }

        let result = builder.await.map_err(DbError::from)?;
        result
            .check()
            .map_err(|e| write_error(DbError::from_check(e), user_id, dept_id))?;

        debug!(
            user_id = %user_id,
            dept_id = %dept_id,
            demoted = ?current.map(|c| c.dept_id),
            "Primary department switched"
        );
        Ok(true)
    }

    async fn add_auxiliary(&self, user_id: Uuid, dept_id: Uuid) -> OrgChartResult<bool> {
        match self.find_edge(user_id, dept_id).await? {
            Some(edge) if edge.is_primary => Err(OrgChartError::Conflict {
                reason: format!("department {dept_id} is the primary department of user {user_id}"),
            }),
            Some(_) => Ok(false),
            None => {
                self.insert(NewMembership {
                    user_id,
                    dept_id,
                    is_primary: false,
                })
                .await?;
                Ok(true)
            }
        }
    }

    async fn remove_auxiliary(&self, user_id: Uuid, dept_id: Uuid) -> OrgChartResult<()> {
        match self.find_edge(user_id, dept_id).await? {
            None => Err(OrgChartError::not_found(
                ENTITY,
                format!("{user_id}/{dept_id}"),
            )),
            Some(edge) if edge.is_primary => Err(OrgChartError::Conflict {
                reason: format!(
                    "department {dept_id} is the primary department of user {user_id}; \
                     reassign it instead"
                ),
            }),
            Some(edge) => self.delete(edge.id).await,
        }
    }
}

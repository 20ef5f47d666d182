//! Integration tests for the organization repository using in-memory
//! SurrealDB.

use orgchart_core::error::{ErrorKind, OrgChartError};
use orgchart_core::models::membership::NewMembership;
use orgchart_core::models::organization::{
    AncestorRewrite, NewOrganization, OrgKind, OrgStatus, Organization, SubtreeMove,
    UpdateOrganization,
};
use orgchart_core::repository::{MembershipRepository, OrganizationRepository};
use orgchart_core::tree;
use orgchart_db::repository::{SurrealMembershipRepository, SurrealOrganizationRepository};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    orgchart_db::run_migrations(&db).await.unwrap();
    db
}

fn new_node(name: &str, parent: Option<&Organization>) -> NewOrganization {
    NewOrganization {
        parent_id: parent.map(|p| p.id),
        name: name.into(),
        code: None,
        ancestors: match parent {
            Some(p) => tree::compute_ancestors(&p.ancestors, &p.id.to_string()),
            None => "0".into(),
        },
        sort_order: 0,
        leader_id: None,
        kind: if parent.is_some() {
            OrgKind::Department
        } else {
            OrgKind::Root
        },
        status: OrgStatus::Enabled,
        description: None,
    }
}

async fn insert(
    repo: &SurrealOrganizationRepository<Db>,
    name: &str,
    parent: Option<&Organization>,
) -> Organization {
    repo.insert(new_node(name, parent)).await.unwrap()
}

#[tokio::test]
async fn insert_and_find() {
    let repo = SurrealOrganizationRepository::new(setup().await);

    let root = insert(&repo, "HQ", None).await;
    assert_eq!(root.ancestors, "0");
    assert!(root.parent_id.is_none());

    let eng = insert(&repo, "Eng", Some(&root)).await;
    assert_eq!(eng.ancestors, format!("0,{}", root.id));

    let fetched = repo.find(eng.id).await.unwrap();
    assert_eq!(fetched.parent_id, Some(root.id));
    assert_eq!(fetched.name, "Eng");
    assert_eq!(fetched.kind, OrgKind::Department);
    assert_eq!(fetched.status, OrgStatus::Enabled);
}

#[tokio::test]
async fn sibling_name_is_unique_among_live_rows() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;
    let eng = insert(&repo, "Eng", Some(&root)).await;

    let err = repo.insert(new_node("Eng", Some(&root))).await.unwrap_err();
    assert!(matches!(err, OrgChartError::NameConflict { ref name } if name == "Eng"));

    // Same name under another parent is fine.
    let other = insert(&repo, "Other", None).await;
    insert(&repo, "Eng", Some(&other)).await;

    // Soft-deleting frees the name.
    repo.soft_delete(eng.id).await.unwrap();
    insert(&repo, "Eng", Some(&root)).await;
}

#[tokio::test]
async fn code_is_globally_unique_when_present() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;

    let mut first = new_node("A", Some(&root));
    first.code = Some("ENG".into());
    let a = repo.insert(first).await.unwrap();

    let mut dup = new_node("B", Some(&root));
    dup.code = Some("ENG".into());
    let err = repo.insert(dup).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CodeConflict);

    // Nodes without a code never collide.
    insert(&repo, "C", Some(&root)).await;
    insert(&repo, "D", Some(&root)).await;

    let by_code = repo.find_by_code("ENG").await.unwrap().unwrap();
    assert_eq!(by_code.id, a.id);
    assert!(repo.find_by_code("NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn find_by_parent_and_name() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;
    let eng = insert(&repo, "Eng", Some(&root)).await;

    let found = repo
        .find_by_parent_and_name(Some(root.id), "Eng")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, eng.id);

    let root_found = repo.find_by_parent_and_name(None, "HQ").await.unwrap();
    assert_eq!(root_found.map(|r| r.id), Some(root.id));

    assert!(
        repo.find_by_parent_and_name(None, "Eng")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn update_sets_and_clears_fields() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;
    let leader = Uuid::now_v7();

    let updated = repo
        .update(
            root.id,
            UpdateOrganization {
                name: Some("Head Office".into()),
                code: Some(Some("HO".into())),
                leader_id: Some(Some(leader)),
                description: Some(Some("top".into())),
                sort_order: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Head Office");
    assert_eq!(updated.code.as_deref(), Some("HO"));
    assert_eq!(updated.leader_id, Some(leader));
    assert_eq!(updated.sort_order, 7);

    let cleared = repo
        .update(
            root.id,
            UpdateOrganization {
                code: Some(None),
                leader_id: Some(None),
                description: Some(Some("   ".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.code, None);
    assert_eq!(cleared.leader_id, None);
    assert_eq!(cleared.description, None);
    assert_eq!(cleared.name, "Head Office");

    // The cleared code can be reused elsewhere.
    let mut other = new_node("Other", None);
    other.code = Some("HO".into());
    repo.insert(other).await.unwrap();
}

#[tokio::test]
async fn update_missing_node_is_not_found() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let err = repo
        .update(
            Uuid::now_v7(),
            UpdateOrganization {
                sort_order: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn soft_deleted_rows_are_invisible() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;
    let eng = insert(&repo, "Eng", Some(&root)).await;

    assert!(repo.has_children(root.id).await.unwrap());
    repo.soft_delete(eng.id).await.unwrap();

    assert_eq!(repo.find(eng.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert!(!repo.has_children(root.id).await.unwrap());
    assert_eq!(repo.find_tree(None).await.unwrap().len(), 1);
    assert_eq!(
        repo.soft_delete(eng.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn tree_is_ordered_and_filterable() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;

    let mut late = new_node("Late", Some(&root));
    late.sort_order = 9;
    let late = repo.insert(late).await.unwrap();
    let mut early = new_node("Early", Some(&root));
    early.sort_order = 1;
    early.status = OrgStatus::Disabled;
    let early = repo.insert(early).await.unwrap();

    let all = repo.find_tree(None).await.unwrap();
    let ids: Vec<Uuid> = all.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![root.id, early.id, late.id]);

    let disabled = repo.find_tree(Some(OrgStatus::Disabled)).await.unwrap();
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0].id, early.id);

    let children = repo.find_children(Some(root.id)).await.unwrap();
    assert_eq!(children.len(), 2);
    let roots = repo.find_children(None).await.unwrap();
    assert_eq!(roots.len(), 1);
}

#[tokio::test]
async fn subtree_and_descendant_predicates_agree() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let root = insert(&repo, "HQ", None).await;
    let a = insert(&repo, "A", Some(&root)).await;
    let t = insert(&repo, "T", Some(&a)).await;
    let j = insert(&repo, "J", Some(&t)).await;
    let b = insert(&repo, "B", Some(&root)).await;
    let all = [&root, &a, &t, &j, &b];

    for node in all {
        let subtree: Vec<Uuid> = repo
            .find_subtree(node.id)
            .await
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert!(subtree.contains(&node.id));
        for other in all {
            let descends = repo.is_descendant(node.id, other.id).await.unwrap();
            if other.id != node.id {
                assert_eq!(subtree.contains(&other.id), descends);
            } else {
                assert!(!descends);
            }
        }
    }

    let a_subtree = repo.find_subtree(a.id).await.unwrap();
    assert_eq!(a_subtree.len(), 3);
    assert!(!repo.is_descendant(a.id, Uuid::now_v7()).await.unwrap());
}

#[tokio::test]
async fn apply_move_rewrites_descendants() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let r = insert(&repo, "R", None).await;
    let r2 = insert(&repo, "R2", None).await;
    let a = insert(&repo, "A", Some(&r)).await;
    let t = insert(&repo, "T", Some(&a)).await;
    let j = insert(&repo, "J", Some(&t)).await;

    let new_ancestors = tree::compute_ancestors(&r2.ancestors, &r2.id.to_string());
    let old_prefix = a.descendant_prefix();
    let new_prefix = format!("{new_ancestors},{}", a.id);
    let descendants: Vec<Organization> = repo
        .find_subtree(a.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|o| o.id != a.id)
        .collect();

    let moved = repo
        .apply_move(SubtreeMove {
            id: a.id,
            parent_id: Some(r2.id),
            ancestors: new_ancestors.clone(),
            descendants: tree::descendant_rewrites(&descendants, &old_prefix, &new_prefix),
        })
        .await
        .unwrap();

    assert_eq!(moved.parent_id, Some(r2.id));
    assert_eq!(moved.ancestors, format!("0,{}", r2.id));
    assert_eq!(
        repo.find(t.id).await.unwrap().ancestors,
        format!("0,{},{}", r2.id, a.id)
    );
    assert_eq!(
        repo.find(j.id).await.unwrap().ancestors,
        format!("0,{},{},{}", r2.id, a.id, t.id)
    );
}

#[tokio::test]
async fn apply_move_into_name_clash_changes_nothing() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let r = insert(&repo, "R", None).await;
    let r2 = insert(&repo, "R2", None).await;
    let a = insert(&repo, "A", Some(&r)).await;
    let t = insert(&repo, "T", Some(&a)).await;
    insert(&repo, "A", Some(&r2)).await;

    let new_ancestors = format!("0,{}", r2.id);
    let result = repo
        .apply_move(SubtreeMove {
            id: a.id,
            parent_id: Some(r2.id),
            ancestors: new_ancestors.clone(),
            descendants: vec![AncestorRewrite {
                id: t.id,
                ancestors: format!("{new_ancestors},{}", a.id),
            }],
        })
        .await;
    assert!(result.is_err());

    assert_eq!(repo.find(a.id).await.unwrap().parent_id, Some(r.id));
    assert_eq!(repo.find(t.id).await.unwrap().ancestors, t.ancestors);
}

#[tokio::test]
async fn failed_descendant_rewrite_rolls_back_node() {
    let repo = SurrealOrganizationRepository::new(setup().await);
    let r = insert(&repo, "R", None).await;
    let r2 = insert(&repo, "R2", None).await;
    let a = insert(&repo, "A", Some(&r)).await;
    let t = insert(&repo, "T", Some(&a)).await;
    let j = insert(&repo, "J", Some(&t)).await;

    let new_ancestors = format!("0,{}", r2.id);
    let result = repo
        .apply_move(SubtreeMove {
            id: a.id,
            parent_id: Some(r2.id),
            ancestors: new_ancestors.clone(),
            descendants: vec![
                AncestorRewrite {
                    id: t.id,
                    ancestors: format!("{new_ancestors},{}", a.id),
                },
                // Not rooted at the sentinel: rejected by the schema.
                AncestorRewrite {
                    id: j.id,
                    ancestors: format!("{},{}", a.id, t.id),
                },
            ],
        })
        .await;
    assert!(result.is_err());

    let a_after = repo.find(a.id).await.unwrap();
    assert_eq!(a_after.parent_id, Some(r.id));
    assert_eq!(a_after.ancestors, a.ancestors);
    assert_eq!(repo.find(t.id).await.unwrap().ancestors, t.ancestors);
    assert_eq!(repo.find(j.id).await.unwrap().ancestors, j.ancestors);
}

#[tokio::test]
async fn count_members_sees_both_edge_kinds() {
    let db = setup().await;
    let orgs = SurrealOrganizationRepository::new(db.clone());
    let members = SurrealMembershipRepository::new(db);
    let root = insert(&orgs, "HQ", None).await;
    let dept = insert(&orgs, "Eng", Some(&root)).await;

    assert_eq!(orgs.count_members(dept.id).await.unwrap(), 0);
    members
        .insert(NewMembership {
            user_id: Uuid::now_v7(),
            dept_id: dept.id,
            is_primary: true,
        })
        .await
        .unwrap();
    members
        .insert(NewMembership {
            user_id: Uuid::now_v7(),
            dept_id: dept.id,
            is_primary: false,
        })
        .await
        .unwrap();
    assert_eq!(orgs.count_members(dept.id).await.unwrap(), 2);
}

//! Entity store behaviour: codes, archive lifecycle, listings and deletes.

mod common;

use common::Harness;
use mumu_iam::IamError;
use mumu_iam::storage::AuthorityStorage;
use mumu_iam::types::{AuthorityFilter, PageRequest, Permission, PermissionPatch, Role};

#[tokio::test]
async fn test_role_archive_and_recover() {
    let h = Harness::new();

    let id = h.roles.add(Role::new("ADMIN", "Administrator")).await.unwrap();
    assert_eq!(id, 1);

    let err = h
        .roles
        .add(Role::new("ADMIN", "Second admin"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_code());

    h.roles.archive_by_id(id).await.unwrap();
    assert!(h.roles.find_by_code("ADMIN").await.unwrap_err().is_not_found());
    assert!(h.roles.find_by_id(id).await.unwrap_err().is_not_found());

    h.roles.recover_from_archive_by_id(id).await.unwrap();
    let role = h.roles.find_by_code("ADMIN").await.unwrap();
    assert_eq!(role.id, id);
    assert!(!role.archived);
}

#[tokio::test]
async fn test_archived_code_can_be_reused() {
    let h = Harness::new();

    let first = h.roles.add(Role::new("OPS", "Operations")).await.unwrap();
    h.roles.archive_by_id(first).await.unwrap();
    let second = h.roles.add(Role::new("OPS", "Operations v2")).await.unwrap();
    assert_ne!(first, second);

    // The archived row cannot come back while its code is taken.
    let err = h.roles.recover_from_archive_by_id(first).await.unwrap_err();
    assert!(err.is_duplicate_code());
}

#[tokio::test]
async fn test_validation_rejects_bad_input() {
    let h = Harness::new();

    let err = h.roles.add(Role::new("", "No code")).await.unwrap_err();
    assert!(matches!(err, IamError::InvalidInput { .. }));

    let err = h
        .roles
        .add(Role::new("X".repeat(101), "Too long"))
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_explicit_id() {
    let h = Harness::new();

    let id = h
        .permissions
        .add(Permission::new("READ", "Read").with_id(42))
        .await
        .unwrap();
    assert_eq!(id, 42);

    let err = h
        .permissions
        .add(Permission::new("WRITE", "Write").with_id(42))
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::DuplicateId { id: 42, .. }));

    // Allocation continues after the explicit id.
    let next = h.permissions.add(Permission::new("WRITE", "Write")).await.unwrap();
    assert!(next > 42);
}

#[tokio::test]
async fn test_update_moves_code_key() {
    let h = Harness::new();
    let id = h.permissions.add(Permission::new("READ", "Read")).await.unwrap();

    // Warm the cache under the old code.
    h.permissions.find_by_code("READ").await.unwrap();

    let patch = PermissionPatch {
        code: Some("READ_ALL".to_string()),
        ..PermissionPatch::default()
    };
    let updated = h.permissions.update_by_id(id, patch).await.unwrap();
    assert_eq!(updated.code, "READ_ALL");

    assert!(h.permissions.find_by_code("READ").await.unwrap_err().is_not_found());
    assert_eq!(h.permissions.find_by_code("READ_ALL").await.unwrap().id, id);
    assert_eq!(h.permissions.find_by_id(id).await.unwrap().code, "READ_ALL");
}

#[tokio::test]
async fn test_update_rejects_taken_code() {
    let h = Harness::new();
    h.permissions.add(Permission::new("READ", "Read")).await.unwrap();
    let write = h.permissions.add(Permission::new("WRITE", "Write")).await.unwrap();

    let patch = PermissionPatch {
        code: Some("READ".to_string()),
        ..PermissionPatch::default()
    };
    let err = h.permissions.update_by_id(write, patch).await.unwrap_err();
    assert!(err.is_duplicate_code());
}

#[tokio::test]
async fn test_page_and_slice_agree() {
    let h = Harness::new();
    for i in 1..=7 {
        h.permissions
            .add(Permission::new(format!("P{i}"), format!("Permission {i}")))
            .await
            .unwrap();
    }
    let filter = AuthorityFilter::new();

    let page = h
        .permissions
        .find_all(&filter, PageRequest::new(2, 3))
        .await
        .unwrap();
    let slice = h
        .permissions
        .find_all_slice(&filter, PageRequest::new(2, 3))
        .await
        .unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.total_pages(), 3);
    assert_eq!(page.items, slice.items);
    assert!(slice.has_next);

    let ids: Vec<i64> = page.items.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![4, 5, 6]);

    let last = h
        .permissions
        .find_all_slice(&filter, PageRequest::new(3, 3))
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_next);
}

#[tokio::test]
async fn test_filtered_and_archived_listings() {
    let h = Harness::new();
    let read = h.permissions.add(Permission::new("DOC_READ", "Read docs")).await.unwrap();
    h.permissions.add(Permission::new("DOC_WRITE", "Write docs")).await.unwrap();
    h.permissions.add(Permission::new("USER_READ", "Read users")).await.unwrap();
    h.permissions.archive_by_id(read).await.unwrap();

    let by_name = AuthorityFilter::new().with_name("DOCS");
    let active = h
        .permissions
        .find_all(&by_name, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(active.total, 1);
    assert_eq!(active.items[0].code, "DOC_WRITE");

    let by_code = AuthorityFilter::new().with_code("USER_READ");
    let users = h
        .permissions
        .find_all(&by_code, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(users.total, 1);

    let archived = h
        .permissions
        .find_archived_all(&AuthorityFilter::new(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(archived.total, 1);
    assert_eq!(archived.items[0].id, read);

    let archived_slice = h
        .permissions
        .find_archived_all_slice(&AuthorityFilter::new(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(archived_slice.items, archived.items);
}

#[tokio::test]
async fn test_name_filter_is_literal() {
    let h = Harness::new();
    for (code, name) in [("P1", "100% done"), ("P2", "1000 done"), ("P3", "a_b"), ("P4", "AXB")] {
        h.permissions.add(Permission::new(code, name)).await.unwrap();
    }

    for (needle, expected) in [("100%", vec!["P1"]), ("A_B", vec!["P3"]), ("%", vec!["P1"])] {
        let page = h
            .permissions
            .find_all(&AuthorityFilter::new().with_name(needle), PageRequest::default())
            .await
            .unwrap();
        let codes: Vec<&str> = page.items.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, expected, "name filter {needle:?}");
    }
}

#[tokio::test]
async fn test_invalid_page_request() {
    let h = Harness::new();
    let err = h
        .roles
        .find_all(&AuthorityFilter::new(), PageRequest::new(0, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_delete_by_id_and_code() {
    let h = Harness::new();
    let a = h.roles.add(Role::new("A", "A")).await.unwrap();
    let b = h.roles.add(Role::new("B", "B")).await.unwrap();
    h.roles.find_by_id(a).await.unwrap();

    h.roles.archive_by_id(a).await.unwrap();
    h.roles.delete_by_id(a).await.unwrap();
    assert!(h.storage.roles().find_by_id(a).await.unwrap().is_none());
    assert!(h.roles.delete_by_id(a).await.unwrap_err().is_not_found());

    h.roles.delete_by_code("B").await.unwrap();
    assert!(h.roles.find_by_id(b).await.unwrap_err().is_not_found());
    assert!(h.roles.delete_by_code("B").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_adds_with_same_code() {
    let h = std::sync::Arc::new(Harness::new());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = std::sync::Arc::clone(&h);
            tokio::spawn(async move { h.roles.add(Role::new("RACE", format!("Racer {i}"))).await })
        })
        .collect();

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => won += 1,
            Err(e) => assert!(e.is_duplicate_code()),
        }
    }
    assert_eq!(won, 1);
}

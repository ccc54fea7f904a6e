//! End-to-end migrations between in-memory databases.

use std::collections::BTreeMap;

use karmasync_core::builtin::{MODEL_TAG, ROLE_TAG, USER_TAG};
use karmasync_core::proto::{Model, Value};
use karmasync_core::{
    DependencyError, MemoryDatabase, MigrationConfig, MigrationError, MigrationStatus, Migrator,
    RecordImage, StepStatus, ValidationError,
};
use pretty_assertions::assert_eq;

struct Blog {
    db: MemoryDatabase,
    authors: String,
    posts: String,
    ada: String,
    grace: String,
    first_post: String,
}

fn blog() -> Blog {
    let db = MemoryDatabase::new();
    let authors = db
        .define(&Model::structure([("name", Model::String)]))
        .unwrap();
    let posts = db
        .define_with(|posts| {
            Model::structure([
                ("title", Model::String),
                ("author", Model::reference(authors.clone())),
                ("reply_to", Model::optional(Model::reference(posts))),
            ])
        })
        .unwrap();

    let ada = db
        .insert(&authors, Value::structure([("name", Value::from("Ada"))]))
        .unwrap();
    let grace = db
        .insert(&authors, Value::structure([("name", Value::from("Grace"))]))
        .unwrap();
    let first_post = db
        .insert(
            &posts,
            Value::structure([
                ("title", Value::from("Notes")),
                ("author", Value::reference(authors.clone(), ada.clone())),
            ]),
        )
        .unwrap();
    db.insert(
        &posts,
        Value::structure([
            ("title", Value::from("Reply")),
            ("author", Value::reference(authors.clone(), grace.clone())),
            ("reply_to", Value::reference(posts.clone(), first_post.clone())),
        ]),
    )
    .unwrap();

    Blog {
        db,
        authors,
        posts,
        ada,
        grace,
        first_post,
    }
}

fn by_title(records: &BTreeMap<String, Value>, title: &str) -> (String, Value) {
    records
        .iter()
        .find(|(_, v)| v.field("title").and_then(Value::as_str) == Some(title))
        .map(|(k, v)| (k.clone(), v.clone()))
        .unwrap()
}

#[tokio::test]
async fn test_authors_replayed_before_posts() {
    let blog = blog();
    let target = MemoryDatabase::new();
    let migrator = Migrator::new(MigrationConfig::new().with_chunk_size(1));

    let report = migrator.migrate(&blog.db, &target).await.unwrap();
    assert_eq!(report.state.status, MigrationStatus::Done);

    let position = |c: &str| report.schedule.order.iter().position(|o| o == c).unwrap();
    assert!(position(blog.authors.as_str()) < position(blog.posts.as_str()));
    assert_eq!(report.schedule.order[0], target.meta_id());
    assert!(report.schedule.is_self_referential(&blog.posts));

    let authors = report.remap.get(&blog.authors).unwrap().to_string();
    let posts = report.remap.get(&blog.posts).unwrap().to_string();
    assert_ne!(authors, blog.authors);
    assert_eq!(target.records(&authors).len(), 2);

    let target_posts = target.records(&posts);
    let (first, notes) = by_title(&target_posts, "Notes");
    let (_, reply) = by_title(&target_posts, "Reply");
    assert_eq!(report.remap.get(&blog.first_post), Some(first.as_str()));
    assert_eq!(
        notes.field("author"),
        Some(&Value::reference(
            authors.clone(),
            report.remap.get(&blog.ada).unwrap()
        ))
    );
    assert_eq!(
        reply.field("author"),
        Some(&Value::reference(
            authors.clone(),
            report.remap.get(&blog.grace).unwrap()
        ))
    );
    assert_eq!(
        reply.field("reply_to"),
        Some(&Value::reference(posts.clone(), first))
    );

    // two definitions, two authors, two posts
    assert_eq!(report.state.written_records(), 6);
    let authors_progress = report
        .state
        .collections
        .iter()
        .find(|p| p.collection == blog.authors)
        .unwrap();
    assert_eq!(authors_progress.status, StepStatus::Complete);
    assert_eq!(authors_progress.written_chunks, 2);
}

#[tokio::test]
async fn test_user_roles_follow_the_target_admin_role() {
    let source = MemoryDatabase::new();
    let roles = source.collection_id(ROLE_TAG).unwrap();
    let users = source.collection_id(USER_TAG).unwrap();
    let admin_role = source.records(&roles).into_keys().next().unwrap();
    source
        .insert(
            &users,
            Value::structure([
                ("username", Value::from("bob")),
                ("password", Value::from("hunter2")),
                ("roles", Value::List(vec![Value::reference(roles, admin_role)])),
            ]),
        )
        .unwrap();

    let target = MemoryDatabase::new();
    Migrator::default().migrate(&source, &target).await.unwrap();

    let target_roles = target.collection_id(ROLE_TAG).unwrap();
    let target_admin_role = target.records(&target_roles).into_keys().next().unwrap();
    let target_users = target.records(&target.collection_id(USER_TAG).unwrap());
    assert_eq!(target_users.len(), 2);
    let bob = target_users
        .values()
        .find(|u| u.field("username").and_then(Value::as_str) == Some("bob"))
        .unwrap();
    assert_eq!(
        bob.field("roles"),
        Some(&Value::List(vec![Value::reference(target_roles, target_admin_role)]))
    );
}

#[tokio::test]
async fn test_validation_fails_before_any_write() {
    let blog = blog();
    let target = MemoryDatabase::new();
    let migrator = Migrator::default().with_transform(|mut image, _, _| {
        image.insert("undeclared", "r1", Value::Null);
        image
    });

    let err = migrator.migrate(&blog.db, &target).await.unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Validation(ValidationError::MissingModel { ref collection })
            if collection == "undeclared"
    ));
    assert_eq!(target.collection_ids().len(), 6);
    let models = target.records(&target.collection_id(MODEL_TAG).unwrap());
    assert_eq!(models.len(), 6);
}

#[tokio::test]
async fn test_dry_run_leaves_target_untouched() {
    let blog = blog();
    let target = MemoryDatabase::new();
    let notes = target
        .define(&Model::structure([("text", Model::String)]))
        .unwrap();
    target
        .insert(&notes, Value::structure([("text", Value::from("keep"))]))
        .unwrap();

    let migrator = Migrator::new(MigrationConfig::new().with_dry_run(true));
    let report = migrator.migrate(&blog.db, &target).await.unwrap();

    assert_eq!(report.state.status, MigrationStatus::Done);
    assert!(report.state.dry_run);
    assert_eq!(report.state.written_records(), 0);
    assert!(report
        .state
        .collections
        .iter()
        .all(|p| p.status == StepStatus::Skipped));
    assert_eq!(target.records(&notes).len(), 1);
    assert!(report.schedule.order.contains(&blog.posts));
}

#[tokio::test]
async fn test_reference_cycle_is_rejected() {
    let source = MemoryDatabase::new();
    let left = source
        .define(&Model::structure([(
            "peer",
            Model::optional(Model::reference("right")),
        )]))
        .unwrap();
    let right = source
        .define(&Model::structure([("peer", Model::reference(left.clone()))]))
        .unwrap();
    let l1 = source
        .insert(&left, Value::structure([("peer", Value::Null)]))
        .unwrap();
    let r1 = source
        .insert(
            &right,
            Value::structure([("peer", Value::reference(left.clone(), l1))]),
        )
        .unwrap();
    source
        .insert(
            &left,
            Value::structure([("peer", Value::reference(right.clone(), r1))]),
        )
        .unwrap();

    let target = MemoryDatabase::new();
    let err = Migrator::default()
        .migrate(&source, &target)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), MigrationStatus::Scheduling);
    let mut expected = vec![left, right];
    expected.sort();
    assert!(matches!(
        err,
        MigrationError::Dependency(DependencyError::Cycle { ref collections })
            if *collections == expected
    ));
}

#[tokio::test]
async fn test_exported_image_imports_later() {
    let blog = blog();
    let migrator = Migrator::default();
    let image = migrator.export(&blog.db).await.unwrap();
    assert_eq!(image.collection(&blog.posts).map(BTreeMap::len), Some(2));

    let text = serde_json::to_string(&image).unwrap();
    let image: RecordImage = serde_json::from_str(&text).unwrap();

    let target = MemoryDatabase::new();
    let report = migrator.import(&target, image).await.unwrap();
    let posts = report.remap.get(&blog.posts).unwrap();
    assert_eq!(target.records(posts).len(), 2);
}

#[tokio::test]
async fn test_rejected_chunk_fails_its_collection() {
    let blog = blog();
    let authors = blog.authors.clone();
    let target = MemoryDatabase::new();
    let migrator = Migrator::default().with_transform(move |mut image, _, _| {
        image.insert(authors.clone(), "zz-bad", Value::from("not an author"));
        image
    });

    let err = migrator.migrate(&blog.db, &target).await.unwrap_err();
    assert_eq!(err.stage(), MigrationStatus::Replaying);
    match &err {
        MigrationError::Transport { stage, payload, .. } => {
            assert_eq!(*stage, MigrationStatus::Replaying);
            assert!(payload.as_deref().unwrap().contains("createMultiple"));
        }
        other => panic!("expected a transport error, got {other:?}"),
    }

    let state = migrator.last_state().unwrap();
    assert_eq!(state.status, MigrationStatus::Failed);
    assert_eq!(state.failed_stage, Some(MigrationStatus::Replaying));
    let progress = state
        .collections
        .iter()
        .find(|p| p.collection == blog.authors)
        .unwrap();
    assert_eq!(progress.status, StepStatus::Failed);
    assert!(progress.error.is_some());
}

//! Integration tests for the draft store.
//!
//! Uses in-memory SQLite for fast, isolated tests.

use scrive_storage::{
    Database, DraftRecord, RevisionMetadata, SortOrder, StorageError,
};
use uuid::Uuid;

fn create_test_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn record(timestamp: f64) -> DraftRecord {
    DraftRecord {
        draft_id: Uuid::new_v4().to_string(),
        timestamp,
        start_text: "Freddy take this down".to_string(),
        end_text: Some("Freddy break break".to_string()),
        full_text: "test body".to_string(),
        classname: "Draft".to_string(),
        directory_path: None,
        parent_draft_id: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}

// =============================================================================
// Database Initialization Tests
// =============================================================================

mod initialization {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        assert!(Database::open_in_memory().is_ok());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let db = Database::open(&db_path);
        assert!(db.is_ok(), "Should create file-based database");
        assert!(db_path.exists(), "Database file should exist");
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let db = Database::open(&db_path).unwrap();
            db.put(&record(1.0)).unwrap();
        }

        {
            let db = Database::open(&db_path).unwrap();
            assert_eq!(db.draft_count().unwrap(), 1, "Draft should persist after reopen");
        }
    }

    #[test]
    fn test_invalid_path_fails() {
        let result = Database::open(&PathBuf::from("/nonexistent/path/db.sqlite"));
        assert!(result.is_err(), "Should fail with invalid path");
    }
}

// =============================================================================
// Draft CRUD Tests
// =============================================================================

mod drafts {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let db = create_test_db();
        let draft = record(10.0);
        db.put(&draft).unwrap();

        let retrieved = db.get(&draft.draft_id).unwrap().unwrap();
        assert_eq!(retrieved.draft_id, draft.draft_id);
        assert_eq!(retrieved.full_text, "test body");
        assert_eq!(retrieved.end_text.as_deref(), Some("Freddy break break"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = create_test_db();
        assert!(db.get("no-such-draft").unwrap().is_none());
    }

    #[test]
    fn test_put_is_upsert() {
        let db = create_test_db();
        let mut draft = record(10.0);
        db.put(&draft).unwrap();

        draft.full_text = "revised body".to_string();
        db.put(&draft).unwrap();

        let retrieved = db.get(&draft.draft_id).unwrap().unwrap();
        assert_eq!(retrieved.full_text, "revised body");
        assert_eq!(db.draft_count().unwrap(), 1);
    }

    #[test]
    fn test_open_draft_has_null_end_text() {
        let db = create_test_db();
        let mut draft = record(10.0);
        draft.end_text = None;
        db.put(&draft).unwrap();

        let retrieved = db.get(&draft.draft_id).unwrap().unwrap();
        assert!(retrieved.end_text.is_none());
    }

    #[test]
    fn test_family_query() {
        let db = create_test_db();
        let parent = record(1.0);
        let mut child_a = record(2.0);
        child_a.parent_draft_id = Some(parent.draft_id.clone());
        let mut child_b = record(3.0);
        child_b.parent_draft_id = Some(parent.draft_id.clone());

        db.put(&parent).unwrap();
        db.put(&child_a).unwrap();
        db.put(&child_b).unwrap();

        let (draft, found_parent, children) = db
            .get_with_family(&child_a.draft_id, true, true)
            .unwrap()
            .unwrap();
        assert_eq!(draft.draft_id, child_a.draft_id);
        assert_eq!(found_parent.unwrap().draft_id, parent.draft_id);
        assert!(children.is_empty());

        let (_, none_parent, children) = db
            .get_with_family(&parent.draft_id, true, true)
            .unwrap()
            .unwrap();
        assert!(none_parent.is_none());
        assert_eq!(children.len(), 2);
        // Children come back oldest first.
        assert_eq!(children[0].draft_id, child_a.draft_id);
    }

    #[test]
    fn test_family_query_missing_draft() {
        let db = create_test_db();
        assert!(db.get_with_family("missing", true, true).unwrap().is_none());
    }
}

// =============================================================================
// Pagination Tests
// =============================================================================

mod pagination {
    use super::*;

    fn seed(db: &Database, count: usize) {
        for i in 0..count {
            db.put(&record(i as f64)).unwrap();
        }
    }

    #[test]
    fn test_page_and_total() {
        let db = create_test_db();
        seed(&db, 250);

        let (page, total) = db.list_paginated(100, 0, SortOrder::Desc).unwrap();
        assert_eq!(total, 250);
        assert_eq!(page.len(), 100);

        let (page, total) = db.list_paginated(100, 200, SortOrder::Desc).unwrap();
        assert_eq!(total, 250);
        assert_eq!(page.len(), 50);
    }

    #[test]
    fn test_order_applies_to_timestamp() {
        let db = create_test_db();
        seed(&db, 10);

        let (asc, _) = db.list_paginated(10, 0, SortOrder::Asc).unwrap();
        assert!(asc.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let (desc, _) = db.list_paginated(10, 0, SortOrder::Desc).unwrap();
        assert!(desc.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn test_exhaustive_pagination_yields_each_draft_once() {
        let db = create_test_db();
        seed(&db, 37);

        let mut seen = std::collections::HashSet::new();
        let mut offset = 0;
        loop {
            let (page, total) = db.list_paginated(10, offset, SortOrder::Asc).unwrap();
            for draft in &page {
                assert!(seen.insert(draft.draft_id.clone()), "duplicate draft in pages");
            }
            offset += page.len();
            if offset >= total {
                break;
            }
        }
        assert_eq!(seen.len(), 37);
    }

    #[test]
    fn test_list_since_filters_by_timestamp() {
        let db = create_test_db();
        seed(&db, 20);

        let (page, total) = db.list_since(15.0, 100, 0, SortOrder::Asc).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 5);
        assert!(page.iter().all(|d| d.timestamp >= 15.0));
    }

    #[test]
    fn test_limit_is_capped() {
        let db = create_test_db();
        seed(&db, 5);
        // Limits beyond the cap do not error; they clamp.
        let (page, _) = db.list_paginated(100_000, 0, SortOrder::Asc).unwrap();
        assert_eq!(page.len(), 5);
    }
}

// =============================================================================
// Revision Tests
// =============================================================================

mod revisions {
    use super::*;

    #[test]
    fn test_put_and_list_revision() {
        let db = create_test_db();
        let draft = record(10.0);
        db.put(&draft).unwrap();

        let metadata = RevisionMetadata {
            model: Some("large-v3".to_string()),
            source: Some("whisper_reprocess".to_string()),
            source_uri: Some("http://rescan:9000".to_string()),
            timestamp: None,
        };
        let revision_id = db
            .put_revision(&draft.draft_id, r#"{"full_text": "better body"}"#, &metadata)
            .unwrap();

        let revisions = db.list_revisions(&draft.draft_id).unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].revision_id, revision_id);
        assert_eq!(revisions[0].model.as_deref(), Some("large-v3"));
        assert!(revisions[0].revised_draft_json.contains("better body"));
    }

    #[test]
    fn test_revision_for_missing_draft_is_not_found() {
        let db = create_test_db();
        let result = db.put_revision("missing", "{}", &RevisionMetadata::default());
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        // Nothing was created.
        assert!(db.list_revisions("missing").unwrap().is_empty());
    }

    #[test]
    fn test_revision_does_not_rewrite_original() {
        let db = create_test_db();
        let draft = record(10.0);
        db.put(&draft).unwrap();

        db.put_revision(
            &draft.draft_id,
            r#"{"full_text": "revised"}"#,
            &RevisionMetadata::default(),
        )
        .unwrap();

        let original = db.get(&draft.draft_id).unwrap().unwrap();
        assert_eq!(original.full_text, "test body");
    }

    #[test]
    fn test_multiple_revisions_oldest_first() {
        let db = create_test_db();
        let draft = record(10.0);
        db.put(&draft).unwrap();

        let first = db
            .put_revision(
                &draft.draft_id,
                "{}",
                &RevisionMetadata {
                    timestamp: Some(100.0),
                    ..RevisionMetadata::default()
                },
            )
            .unwrap();
        let second = db
            .put_revision(
                &draft.draft_id,
                "{}",
                &RevisionMetadata {
                    timestamp: Some(200.0),
                    ..RevisionMetadata::default()
                },
            )
            .unwrap();

        let revisions = db.list_revisions(&draft.draft_id).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].revision_id, first);
        assert_eq!(revisions[1].revision_id, second);
    }
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

mod concurrency {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_reads() {
        let db = Arc::new(create_test_db());
        for i in 0..10 {
            db.put(&record(i as f64)).unwrap();
        }

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let (page, total) = db.list_paginated(100, 0, SortOrder::Desc).unwrap();
                        assert_eq!(total, 10);
                        assert_eq!(page.len(), 10);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread panicked");
        }
    }

    #[test]
    fn test_concurrent_writes() {
        let db = Arc::new(create_test_db());

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for j in 0..10 {
                        db.put(&record((i * 10 + j) as f64)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        assert_eq!(db.draft_count().unwrap(), 50);
    }
}

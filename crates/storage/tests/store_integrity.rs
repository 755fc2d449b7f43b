#![forbid(unsafe_code)]

use pl_core::ids::MemberId;
use pl_core::{AuditAction, NewAuditEntry, PointsChange, RankLadder, RelatedEntity};
use pl_storage::{
    CreateMemberRequest, LedgerConfig, LedgerError, ListAuditRequest, ListMembersRequest,
    PointsLedger, SqliteStore, StoreError,
};
use rusqlite::{Connection, params};
use serde_json::json;
use tempfile::TempDir;

const LADDER: &str = "\
ranks:
  - name: Newcomer
    threshold_points: 0
  - name: Regular
    threshold_points: 100
";

fn member(id: &str) -> MemberId {
    MemberId::try_new(id).expect("member id")
}

fn ladder() -> RankLadder {
    RankLadder::from_yaml_str(LADDER).expect("ladder")
}

fn store_with_member(dir: &TempDir, id: &str) -> SqliteStore {
    let mut store = SqliteStore::open(dir.path()).expect("open store");
    store.install_rank_ladder(&ladder()).expect("install ladder");
    store
        .create_member(CreateMemberRequest {
            member_id: id.to_string(),
            display_name: Some("  Robin  ".to_string()),
        })
        .expect("create member");
    store
}

fn raw_conn(store: &SqliteStore) -> Connection {
    Connection::open(store.db_path()).expect("raw connection")
}

#[test]
fn failed_history_insert_rolls_back_the_balance() {
    let dir = TempDir::new().expect("temp dir");
    let mut store = store_with_member(&dir, "m1");
    let ladder = ladder();
    store
        .apply_points_change(
            &ladder,
            &PointsChange::new(member("m1"), 40, "seed", None).expect("change"),
        )
        .expect("seed");

    raw_conn(&store)
        .execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON points_history \
             WHEN NEW.reason = 'boom' BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .expect("install failing trigger");

    let err = store
        .apply_points_change(
            &ladder,
            &PointsChange::new(member("m1"), 100, "boom", None).expect("change"),
        )
        .expect_err("history insert fails");
    assert_eq!(err.code(), "SQLITE");

    let row = store
        .get_member(&member("m1"))
        .expect("get")
        .expect("exists");
    assert_eq!(row.points, 40);
    assert_eq!(row.revision, 1);
    assert_eq!(row.rank_name.as_deref(), Some("Newcomer"));
    assert_eq!(store.count_history(&member("m1")).expect("count"), 1);
}

#[test]
fn engine_failure_is_a_non_fatal_persistence_failure() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_with_member(&dir, "m1");
    raw_conn(&store)
        .execute_batch(
            "CREATE TRIGGER reject_all BEFORE INSERT ON points_history \
             BEGIN SELECT RAISE(ABORT, 'nope'); END;",
        )
        .expect("install failing trigger");
    drop(store);

    let ledger = PointsLedger::open(LedgerConfig::new(dir.path())).expect("open ledger");
    let err = ledger
        .apply_points_change(&member("m1"), 10, "bonus", None)
        .expect_err("insert rejected");
    assert!(matches!(err, LedgerError::PersistenceFailure(_)));
    assert_eq!(err.code(), "PERSISTENCE_FAILURE");
    assert!(!err.is_fatal());
}

#[test]
fn history_and_audit_are_append_only() {
    let dir = TempDir::new().expect("temp dir");
    let mut store = store_with_member(&dir, "m1");
    store
        .apply_points_change(
            &ladder(),
            &PointsChange::new(member("m1"), 5, "seed", None).expect("change"),
        )
        .expect("seed");
    store
        .append_audit(NewAuditEntry {
            actor_id: None,
            action: AuditAction::PointsAdjusted,
            meta: json!({}),
            points: Some(5),
        })
        .expect("audit");

    let conn = raw_conn(&store);
    for sql in [
        "UPDATE points_history SET change = 500",
        "DELETE FROM points_history",
        "UPDATE audit_log SET points = 500",
        "DELETE FROM audit_log",
    ] {
        let err = conn.execute(sql, []).expect_err(sql);
        assert!(err.to_string().contains("append-only"), "{sql}: {err}");
    }
    assert_eq!(store.points_history_sum(&member("m1")).expect("sum"), 5);
}

#[test]
fn negative_balance_is_rejected_by_the_schema() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_with_member(&dir, "m1");
    let err = raw_conn(&store)
        .execute("UPDATE members SET points = -1 WHERE id = ?1", params!["m1"])
        .expect_err("check constraint");
    assert!(err.to_string().contains("CHECK"), "{err}");
}

#[test]
fn unknown_tables_require_a_reset() {
    let dir = TempDir::new().expect("temp dir");
    {
        let conn = Connection::open(dir.path().join("points_ledger.db")).expect("raw db");
        conn.execute_batch("CREATE TABLE legacy_scores(id TEXT PRIMARY KEY, score INTEGER);")
            .expect("legacy table");
    }

    let err = SqliteStore::open(dir.path()).expect_err("preflight rejects");
    assert_eq!(err.code(), "RESET_REQUIRED");

    let err = PointsLedger::open(LedgerConfig::new(dir.path())).expect_err("ledger rejects");
    assert_eq!(err.code(), "PERSISTENCE_FAILURE");
}

#[test]
fn schema_version_mismatch_requires_a_reset() {
    let dir = TempDir::new().expect("temp dir");
    let store = store_with_member(&dir, "m1");
    raw_conn(&store)
        .execute("UPDATE store_state SET schema_version = 99", [])
        .expect("bump version");
    drop(store);

    match SqliteStore::open(dir.path()) {
        Err(err @ StoreError::InvalidInput(_)) => assert_eq!(err.code(), "RESET_REQUIRED"),
        other => panic!("expected RESET_REQUIRED, got {other:?}"),
    }
}

#[test]
fn duplicate_member_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let mut store = store_with_member(&dir, "m1");
    let err = store
        .create_member(CreateMemberRequest {
            member_id: "m1".to_string(),
            display_name: None,
        })
        .expect_err("duplicate");
    assert_eq!(err.code(), "MEMBER_EXISTS");

    let err = store
        .create_member(CreateMemberRequest {
            member_id: "-leading-dash".to_string(),
            display_name: None,
        })
        .expect_err("invalid id");
    assert_eq!(err.code(), "INVALID_INPUT");

    let rows = store
        .list_members(ListMembersRequest { limit: 10, offset: 0 })
        .expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].display_name.as_deref(), Some("Robin"));
    assert_eq!(rows[0].rank_name, None, "no rank before the first change");
}

#[test]
fn related_entities_and_submission_counts() {
    let dir = TempDir::new().expect("temp dir");
    let mut store = store_with_member(&dir, "m1");
    let ladder = ladder();
    let m1 = member("m1");

    let changes = [
        (50, "Poster run", RelatedEntity::Task("t-1".into())),
        (20, "donation d-1", RelatedEntity::Donation("d-1".into())),
        (-10, "[deadline-miss] Flyers", RelatedEntity::Task("t-2".into())),
    ];
    for (delta, reason, related) in changes {
        let change = PointsChange::new(m1.clone(), delta, reason, Some(related)).expect("change");
        store.apply_points_change(&ladder, &change).expect("apply");
    }

    let history = store.list_points_history(&m1, 10).expect("history");
    assert_eq!(history.len(), 3);
    assert!(history[0].is_deadline_miss());
    assert_eq!(history[1].related_donation_id.as_deref(), Some("d-1"));
    assert_eq!(history[2].related_task_id.as_deref(), Some("t-1"));
    assert_eq!(store.count_submissions(&m1).expect("submissions"), 2);
    assert_eq!(store.points_history_sum(&m1).expect("sum"), 60);
}

#[test]
fn audit_listing_filters_by_action_and_actor() {
    let dir = TempDir::new().expect("temp dir");
    let mut store = store_with_member(&dir, "admin");
    for (actor, action) in [
        (Some("admin"), AuditAction::PointsAdjusted),
        (None, AuditAction::DeadlineMissed),
        (Some("admin"), AuditAction::RankPromoted),
    ] {
        store
            .append_audit(NewAuditEntry {
                actor_id: actor.map(member),
                action,
                meta: json!({ "note": action.as_str() }),
                points: None,
            })
            .expect("audit");
    }

    let all = store
        .list_audit(ListAuditRequest {
            limit: 10,
            action: None,
            actor_id: None,
        })
        .expect("all");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].action, "rank_promoted", "most recent first");
    assert_eq!(all[0].meta["note"], "rank_promoted");

    let by_admin = store
        .list_audit(ListAuditRequest {
            limit: 10,
            action: None,
            actor_id: Some("admin".to_string()),
        })
        .expect("by actor");
    assert_eq!(by_admin.len(), 2);

    let sweeps = store
        .list_audit(ListAuditRequest {
            limit: 10,
            action: Some(AuditAction::DeadlineMissed),
            actor_id: None,
        })
        .expect("by action");
    assert_eq!(sweeps.len(), 1);
    assert_eq!(sweeps[0].actor_id, None);

    let err = store
        .list_audit(ListAuditRequest {
            limit: 0,
            action: None,
            actor_id: None,
        })
        .expect_err("zero limit");
    assert_eq!(err.code(), "INVALID_INPUT");
}

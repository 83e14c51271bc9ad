use crate::config::SyncSettings;
use crate::error::GradeResult;
use crate::score::ScoreValue;
use crate::store::{resolve_entry_context, GradeKey, GradeRecord, GradeStore};
use crate::sync::{SyncEngine, WriteRequest};
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct GradeEntry<'a> {
    pub evaluation_id: &'a str,
    pub student_id: &'a str,
    pub raw: &'a str,
    pub comment: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub changed: bool,
    /// The stored grade after the call; the existing one when nothing changed.
    pub record: Option<GradeRecord>,
    /// "synced", "queued", "dead_letter", or absent when nothing changed.
    pub sync: Option<&'static str>,
    /// Queue item carrying the remote write when it could not be applied yet.
    pub queued_id: Option<String>,
    pub pending_count: usize,
}

/// Validates a mark, records it locally and hands the remote write to the
/// sync engine. Blank input changes nothing. Validation and configuration
/// errors return before anything is stored, and the local row is only
/// committed once the remote write is synced or staged in the queue.
pub fn submit_grade(
    conn: &Connection,
    engine: &mut SyncEngine,
    sync: &SyncSettings,
    entry: &GradeEntry<'_>,
) -> GradeResult<SubmitResult> {
    let ctx = resolve_entry_context(conn, entry.evaluation_id)?;
    let Some(value) = ScoreValue::parse(entry.raw, &ctx.scale)? else {
        let existing = GradeStore::new(conn).get_one(&GradeKey {
            evaluation_id: ctx.evaluation_id,
            student_id: entry.student_id.to_string(),
        })?;
        return Ok(SubmitResult {
            changed: false,
            record: existing,
            sync: None,
            queued_id: None,
            pending_count: engine.pending_count(),
        });
    };

    let record = GradeRecord {
        evaluation_id: ctx.evaluation_id,
        student_id: entry.student_id.to_string(),
        subject_id: ctx.subject_id,
        value,
        comment: entry
            .comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
    };
    let tx = conn.unchecked_transaction()?;
    GradeStore::new(&tx).upsert(&record)?;

    let request = WriteRequest::upsert(
        sync.grades_collection.clone(),
        record.remote_payload(),
        sync.conflict_key.clone(),
    );
    // Dropping `tx` on error rolls the local row back.
    let outcome = engine.submit(request)?;
    tx.commit()?;

    Ok(SubmitResult {
        changed: true,
        record: Some(record),
        sync: Some(outcome.label()),
        queued_id: outcome.item().map(|item| item.id.clone()),
        pending_count: engine.pending_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::db;
    use crate::error::{GradeError, ValidationError};
    use crate::sync::testing::{MemoryPersistence, MemoryRemote};
    use crate::sync::{RetryPolicy, SyncQueue};

    fn setup() -> (Connection, String, SyncEngine, MemoryRemote) {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        catalog::upsert_class(&conn, Some("cp"), "CP", Some("CP")).unwrap();
        catalog::upsert_subject(&conn, Some("lecture"), "Lecture", 2.0).unwrap();
        let ev = catalog::create_evaluation(&conn, "cp", "lecture", Some(1), "dictée", None)
            .unwrap()
            .id;
        let remote = MemoryRemote::default();
        let queue = SyncQueue::open(Box::new(MemoryPersistence::default())).unwrap();
        let engine = SyncEngine::new(queue, Box::new(remote.clone()), RetryPolicy::default());
        (conn, ev, engine, remote)
    }

    fn entry<'a>(ev: &'a str, raw: &'a str) -> GradeEntry<'a> {
        GradeEntry {
            evaluation_id: ev,
            student_id: "s1",
            raw,
            comment: None,
        }
    }

    #[test]
    fn early_level_scale_applies() {
        let (conn, ev, mut engine, _) = setup();
        let sync = SyncSettings::default();
        let err = submit_grade(&conn, &mut engine, &sync, &entry(&ev, "12")).unwrap_err();
        assert!(matches!(
            err,
            GradeError::Validation(ValidationError::OutOfRange { max, .. }) if max == 10.0
        ));
        assert!(GradeStore::new(&conn).get(&ev).unwrap().is_empty());
        assert_eq!(engine.pending_count(), 0, "validation errors never reach the queue");

        let ok = submit_grade(&conn, &mut engine, &sync, &entry(&ev, "7,5")).unwrap();
        assert!(ok.changed);
        assert_eq!(ok.sync, Some("queued"));
        assert_eq!(ok.pending_count, 1);
        assert!(ok.queued_id.is_some());
    }

    #[test]
    fn blank_input_keeps_existing_value() {
        let (conn, ev, mut engine, _) = setup();
        let sync = SyncSettings::default();
        submit_grade(&conn, &mut engine, &sync, &entry(&ev, "8")).unwrap();
        let res = submit_grade(&conn, &mut engine, &sync, &entry(&ev, "  ")).unwrap();
        assert!(!res.changed);
        assert_eq!(res.pending_count, 1);
        assert_eq!(
            res.record.map(|r| r.value),
            Some(ScoreValue::Numeric(8.0))
        );
        let rows = GradeStore::new(&conn).get(&ev).unwrap();
        assert_eq!(rows[0].value, ScoreValue::Numeric(8.0));
    }

    #[test]
    fn missing_evaluation_records_nothing() {
        let (conn, _, mut engine, _) = setup();
        let err = submit_grade(
            &conn,
            &mut engine,
            &SyncSettings::default(),
            &entry("ghost", "5"),
        )
        .unwrap_err();
        assert_eq!(err.code(), "configuration_error");
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn online_submit_syncs_upsert_by_natural_key() {
        let (conn, ev, mut engine, remote) = setup();
        let sync = SyncSettings::default();
        engine.on_process_start(true);
        let mut first = entry(&ev, "ABS");
        first.comment = Some(" malade ");
        let res = submit_grade(&conn, &mut engine, &sync, &first).unwrap();
        assert_eq!(res.sync, Some("synced"));
        assert_eq!(res.queued_id, None);
        assert_eq!(
            res.record.as_ref().and_then(|r| r.comment.as_deref()),
            Some("malade")
        );
        submit_grade(&conn, &mut engine, &sync, &entry(&ev, "9")).unwrap();
        assert_eq!(remote.row_count(), 1);
        assert_eq!(remote.attempt_count(), 2);
    }

    #[test]
    fn unstaged_write_is_not_kept_locally() {
        let (conn, ev, _, _) = setup();
        let sync = SyncSettings::default();
        let store = MemoryPersistence::default();
        let queue = SyncQueue::open(Box::new(store.clone())).unwrap();
        let mut engine =
            SyncEngine::new(queue, Box::new(MemoryRemote::default()), RetryPolicy::default());
        submit_grade(&conn, &mut engine, &sync, &entry(&ev, "8")).unwrap();

        store.fail_writes(true);
        let err = submit_grade(&conn, &mut engine, &sync, &entry(&ev, "9")).unwrap_err();
        assert_eq!(err.code(), "sync_queue_failed");
        let mut other = entry(&ev, "4");
        other.student_id = "s2";
        assert!(submit_grade(&conn, &mut engine, &sync, &other).is_err());

        let rows = GradeStore::new(&conn).get(&ev).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, ScoreValue::Numeric(8.0));
        assert_eq!(engine.pending_count(), 1);

        store.fail_writes(false);
        let res = submit_grade(&conn, &mut engine, &sync, &entry(&ev, "9")).unwrap();
        assert_eq!(res.pending_count, 2);
        assert_eq!(
            GradeStore::new(&conn).get(&ev).unwrap()[0].value,
            ScoreValue::Numeric(9.0)
        );
    }
}

use crate::catalog;
use crate::config;
use crate::error::{GradeError, GradeResult};
use crate::score::{GradingScale, ScoreValue};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GradeKey {
    pub evaluation_id: String,
    pub student_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub evaluation_id: String,
    pub student_id: String,
    pub subject_id: String,
    pub value: ScoreValue,
    pub comment: Option<String>,
}

impl GradeRecord {
    pub fn key(&self) -> GradeKey {
        GradeKey {
            evaluation_id: self.evaluation_id.clone(),
            student_id: self.student_id.clone(),
        }
    }

    /// Row shape written to the remote `grades` collection. The natural key
    /// columns double as the upsert conflict key.
    pub fn remote_payload(&self) -> serde_json::Value {
        json!({
            "evaluation_id": self.evaluation_id,
            "student_id": self.student_id,
            "subject_id": self.subject_id,
            "value": self.value.numeric(),
            "status": self.value.status(),
            "comment": self.comment,
        })
    }
}

/// Everything a grade entry needs to know about its evaluation.
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub evaluation_id: String,
    pub subject_id: String,
    pub scale: GradingScale,
}

/// Resolves the evaluation, subject and class behind a grade entry. Any gap is
/// a configuration error and the entry must not be recorded.
pub fn resolve_entry_context(conn: &Connection, evaluation_id: &str) -> GradeResult<EntryContext> {
    let Some(evaluation) = catalog::get_evaluation(conn, evaluation_id)? else {
        return Err(GradeError::configuration(format!(
            "unknown evaluation {}",
            evaluation_id
        )));
    };
    if catalog::get_subject(conn, &evaluation.subject_id)?.is_none() {
        return Err(GradeError::configuration(format!(
            "evaluation {} references missing subject {}",
            evaluation_id, evaluation.subject_id
        )));
    }
    let Some(class) = catalog::get_class(conn, &evaluation.class_id)? else {
        return Err(GradeError::configuration(format!(
            "evaluation {} references missing class {}",
            evaluation_id, evaluation.class_id
        )));
    };
    let settings = config::grading_settings(conn)?;
    let Some(scale) = settings.scale_for_level(class.level.as_deref()) else {
        return Err(GradeError::configuration(format!(
            "no positive grading scale for class {}",
            class.id
        )));
    };
    Ok(EntryContext {
        evaluation_id: evaluation.id,
        subject_id: evaluation.subject_id,
        scale,
    })
}

/// Canonical (evaluation, student) -> grade mapping. There is deliberately no
/// delete.
pub struct GradeStore<'a> {
    conn: &'a Connection,
}

impl<'a> GradeStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts or replaces the record for the record's key.
    pub fn upsert(&self, record: &GradeRecord) -> GradeResult<()> {
        let id = Uuid::new_v4().to_string();
        let updated_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO grades(id, evaluation_id, student_id, subject_id, raw_value, status, comment, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(evaluation_id, student_id) DO UPDATE SET
               subject_id = excluded.subject_id,
               raw_value = excluded.raw_value,
               status = excluded.status,
               comment = excluded.comment,
               updated_at = excluded.updated_at",
            (
                &id,
                &record.evaluation_id,
                &record.student_id,
                &record.subject_id,
                record.value.numeric(),
                record.value.status(),
                &record.comment,
                &updated_at,
            ),
        )?;
        Ok(())
    }

    /// All records of one evaluation. Order is unspecified.
    pub fn get(&self, evaluation_id: &str) -> GradeResult<Vec<GradeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT evaluation_id, student_id, subject_id, raw_value, status, comment
             FROM grades
             WHERE evaluation_id = ?",
        )?;
        let rows = stmt
            .query_map([evaluation_id], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_one(&self, key: &GradeKey) -> GradeResult<Option<GradeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT evaluation_id, student_id, subject_id, raw_value, status, comment
             FROM grades
             WHERE evaluation_id = ? AND student_id = ?",
        )?;
        let mut rows = stmt.query_map((&key.evaluation_id, &key.student_id), row_to_record)?;
        Ok(rows.next().transpose()?)
    }

    /// A student's records across evaluations, optionally limited to one term.
    pub fn for_student(&self, student_id: &str, term: Option<i64>) -> GradeResult<Vec<GradeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT g.evaluation_id, g.student_id, g.subject_id, g.raw_value, g.status, g.comment
             FROM grades g
             JOIN evaluations e ON e.id = g.evaluation_id
             WHERE g.student_id = ?1 AND (?2 IS NULL OR e.term = ?2)
             ORDER BY e.date, e.id",
        )?;
        let rows = stmt
            .query_map((student_id, term), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Distinct classes of the evaluations a student's records belong to.
    pub fn classes_for_student(&self, student_id: &str, term: Option<i64>) -> GradeResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT e.class_id
             FROM grades g
             JOIN evaluations e ON e.id = g.evaluation_id
             WHERE g.student_id = ?1 AND (?2 IS NULL OR e.term = ?2)
             ORDER BY e.class_id",
        )?;
        let rows = stmt
            .query_map((student_id, term), |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeRecord> {
    let raw_value: Option<f64> = r.get(3)?;
    let status: String = r.get(4)?;
    Ok(GradeRecord {
        evaluation_id: r.get(0)?,
        student_id: r.get(1)?,
        subject_id: r.get(2)?,
        value: ScoreValue::from_storage(&status, raw_value),
        comment: r.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seeded() -> (Connection, String) {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        catalog::upsert_class(&conn, Some("c1"), "3e B", Some("3E")).unwrap();
        catalog::upsert_subject(&conn, Some("math"), "Maths", 4.0).unwrap();
        let ev = catalog::create_evaluation(&conn, "c1", "math", Some(1), "devoir", None).unwrap();
        (conn, ev.id)
    }

    fn record(ev: &str, student: &str, value: ScoreValue) -> GradeRecord {
        GradeRecord {
            evaluation_id: ev.to_string(),
            student_id: student.to_string(),
            subject_id: "math".to_string(),
            value,
            comment: None,
        }
    }

    #[test]
    fn upsert_replaces_by_natural_key() {
        let (conn, ev) = seeded();
        let store = GradeStore::new(&conn);
        store.upsert(&record(&ev, "s1", ScoreValue::Numeric(12.0))).unwrap();
        store.upsert(&record(&ev, "s2", ScoreValue::Absent)).unwrap();
        let mut corrected = record(&ev, "s1", ScoreValue::Numeric(14.5));
        corrected.comment = Some("recorrigé".into());
        store.upsert(&corrected).unwrap();

        let mut all = store.get(&ev).unwrap();
        all.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], corrected);
        assert_eq!(all[1].value, ScoreValue::Absent);
        assert_eq!(store.get_one(&corrected.key()).unwrap(), Some(corrected));
    }

    #[test]
    fn context_resolution_reports_missing_configuration() {
        let (conn, ev) = seeded();
        let ctx = resolve_entry_context(&conn, &ev).expect("context");
        assert_eq!(ctx.scale.max_score(), 20.0);
        assert_eq!(ctx.subject_id, "math");

        let err = resolve_entry_context(&conn, "missing").unwrap_err();
        assert!(matches!(err, GradeError::Configuration(_)));
    }

    #[test]
    fn for_student_filters_by_term() {
        let (conn, ev1) = seeded();
        let ev2 = catalog::create_evaluation(&conn, "c1", "math", Some(2), "compo", None)
            .unwrap()
            .id;
        let store = GradeStore::new(&conn);
        store.upsert(&record(&ev1, "s1", ScoreValue::Numeric(10.0))).unwrap();
        store.upsert(&record(&ev2, "s1", ScoreValue::Numeric(16.0))).unwrap();
        store.upsert(&record(&ev2, "s2", ScoreValue::Numeric(9.0))).unwrap();

        assert_eq!(store.for_student("s1", None).unwrap().len(), 2);
        let t2 = store.for_student("s1", Some(2)).unwrap();
        assert_eq!(t2.len(), 1);
        assert_eq!(t2[0].value, ScoreValue::Numeric(16.0));
        assert_eq!(store.classes_for_student("s1", None).unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn remote_payload_uses_natural_key_columns() {
        let p = record("e1", "s1", ScoreValue::NotGraded).remote_payload();
        assert_eq!(p["evaluation_id"], "e1");
        assert_eq!(p["student_id"], "s1");
        assert_eq!(p["status"], "not_graded");
        assert!(p["value"].is_null());
    }
}

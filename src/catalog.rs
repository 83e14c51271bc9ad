//! Institution configuration the grade ledger reads: classes (for the grading
//! scale), subjects (for coefficients) and evaluations (grouping grades).

use crate::error::{GradeError, GradeResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub class_id: String,
    pub subject_id: String,
    pub term: Option<i64>,
    pub kind: String,
    pub date: Option<String>,
}

fn check_coefficient(coefficient: f64) -> GradeResult<()> {
    if !coefficient.is_finite() || coefficient < 0.0 {
        return Err(GradeError::configuration(format!(
            "coefficient must be a finite number >= 0 (got {})",
            coefficient
        )));
    }
    Ok(())
}

pub fn upsert_class(
    conn: &Connection,
    id: Option<&str>,
    name: &str,
    level: Option<&str>,
) -> GradeResult<Class> {
    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let level = level.map(str::trim).filter(|l| !l.is_empty()).map(str::to_string);
    conn.execute(
        "INSERT INTO classes(id, name, level) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, level = excluded.level",
        (&id, name, &level),
    )?;
    Ok(Class {
        id,
        name: name.to_string(),
        level,
    })
}

pub fn get_class(conn: &Connection, id: &str) -> GradeResult<Option<Class>> {
    Ok(conn
        .query_row(
            "SELECT id, name, level FROM classes WHERE id = ?",
            [id],
            |r| {
                Ok(Class {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    level: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn upsert_subject(
    conn: &Connection,
    id: Option<&str>,
    name: &str,
    coefficient: f64,
) -> GradeResult<Subject> {
    check_coefficient(coefficient)?;
    let id = id
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO subjects(id, name, coefficient) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, coefficient = excluded.coefficient",
        (&id, name, coefficient),
    )?;
    Ok(Subject {
        id,
        name: name.to_string(),
        coefficient,
    })
}

/// Coefficients are read live by the aggregator, so an edit here changes every
/// average computed afterwards, including for past terms.
pub fn set_subject_coefficient(conn: &Connection, id: &str, coefficient: f64) -> GradeResult<bool> {
    check_coefficient(coefficient)?;
    let changed = conn.execute(
        "UPDATE subjects SET coefficient = ? WHERE id = ?",
        (coefficient, id),
    )?;
    Ok(changed > 0)
}

pub fn get_subject(conn: &Connection, id: &str) -> GradeResult<Option<Subject>> {
    Ok(conn
        .query_row(
            "SELECT id, name, coefficient FROM subjects WHERE id = ?",
            [id],
            |r| {
                Ok(Subject {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    coefficient: r.get(2)?,
                })
            },
        )
        .optional()?)
}

pub fn list_subjects(conn: &Connection) -> GradeResult<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, name, coefficient FROM subjects ORDER BY name")?;
    let subjects = stmt
        .query_map([], |r| {
            Ok(Subject {
                id: r.get(0)?,
                name: r.get(1)?,
                coefficient: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subjects)
}

pub fn create_evaluation(
    conn: &Connection,
    class_id: &str,
    subject_id: &str,
    term: Option<i64>,
    kind: &str,
    date: Option<&str>,
) -> GradeResult<Evaluation> {
    if get_class(conn, class_id)?.is_none() {
        return Err(GradeError::configuration(format!("unknown class {}", class_id)));
    }
    if get_subject(conn, subject_id)?.is_none() {
        return Err(GradeError::configuration(format!(
            "unknown subject {}",
            subject_id
        )));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO evaluations(id, class_id, subject_id, term, kind, date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, class_id, subject_id, term, kind, date),
    )?;
    Ok(Evaluation {
        id,
        class_id: class_id.to_string(),
        subject_id: subject_id.to_string(),
        term,
        kind: kind.to_string(),
        date: date.map(str::to_string),
    })
}

pub fn get_evaluation(conn: &Connection, id: &str) -> GradeResult<Option<Evaluation>> {
    Ok(conn
        .query_row(
            "SELECT id, class_id, subject_id, term, kind, date FROM evaluations WHERE id = ?",
            [id],
            |r| {
                Ok(Evaluation {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    subject_id: r.get(2)?,
                    term: r.get(3)?,
                    kind: r.get(4)?,
                    date: r.get(5)?,
                })
            },
        )
        .optional()?)
}

use crate::catalog::{self, Subject};
use crate::config;
use crate::error::{GradeError, GradeResult};
use crate::score::ScoreValue;
use crate::store::{GradeRecord, GradeStore};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

/// Appreciation bands are defined on a /20 scale whatever the native scale.
pub const REFERENCE_SCALE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Appreciation {
    #[serde(rename = "Très Bien")]
    TresBien,
    #[serde(rename = "Bien")]
    Bien,
    #[serde(rename = "Assez Bien")]
    AssezBien,
    #[serde(rename = "Passable")]
    Passable,
    #[serde(rename = "Insuffisant")]
    Insuffisant,
}

impl Appreciation {
    /// Bands an average expressed on the reference /20 scale.
    pub fn from_reference(avg20: f64) -> Self {
        if avg20 >= 16.0 {
            Appreciation::TresBien
        } else if avg20 >= 14.0 {
            Appreciation::Bien
        } else if avg20 >= 12.0 {
            Appreciation::AssezBien
        } else if avg20 >= 10.0 {
            Appreciation::Passable
        } else {
            Appreciation::Insuffisant
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SubjectTally {
    pub average: Option<f64>,
    pub scored_count: usize,
    pub absent_count: usize,
    pub not_graded_count: usize,
}

/// Plain mean of the numeric marks. Sentinels count in neither sum nor
/// denominator; no numeric marks means no average, never zero.
pub fn subject_average<I>(values: I) -> SubjectTally
where
    I: IntoIterator<Item = ScoreValue>,
{
    let mut tally = SubjectTally::default();
    let mut sum = 0.0_f64;
    for v in values {
        match v {
            ScoreValue::Numeric(x) => {
                tally.scored_count += 1;
                sum += x;
            }
            ScoreValue::Absent => tally.absent_count += 1,
            ScoreValue::NotGraded => tally.not_graded_count += 1,
        }
    }
    if tally.scored_count > 0 {
        tally.average = Some(sum / tally.scored_count as f64);
    }
    tally
}

/// Coefficient-weighted mean over subjects that have an average. Unavailable
/// when no subject has one or when their coefficients sum to zero.
pub fn overall_average<I>(subjects: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, f64)>,
{
    let mut weighted_sum = 0.0_f64;
    let mut coef_sum = 0.0_f64;
    for (avg, coefficient) in subjects {
        let Some(avg) = avg else {
            continue;
        };
        weighted_sum += avg * coefficient;
        coef_sum += coefficient;
    }
    if coef_sum > 0.0 {
        Some(weighted_sum / coef_sum)
    } else {
        None
    }
}

/// Rescales `overall` from `max_score` to /20 and bands it.
pub fn appreciation(overall: f64, max_score: f64) -> Appreciation {
    let avg20 = if max_score > 0.0 {
        overall * REFERENCE_SCALE / max_score
    } else {
        0.0
    };
    Appreciation::from_reference(avg20)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: String,
    pub name: String,
    pub coefficient: f64,
    pub average: Option<f64>,
    pub scored_count: usize,
    pub absent_count: usize,
    pub not_graded_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragesModel {
    pub student_id: String,
    pub term: Option<i64>,
    pub max_score: Option<f64>,
    pub per_subject: Vec<SubjectAverage>,
    pub overall: Option<f64>,
    pub appreciation: Option<Appreciation>,
}

/// Pure aggregation over a student's records and the subjects' current
/// coefficients. Subjects without any record are not reported.
pub fn aggregate(
    student_id: &str,
    term: Option<i64>,
    max_score: Option<f64>,
    subjects: &[Subject],
    records: &[GradeRecord],
) -> AveragesModel {
    let mut by_subject: BTreeMap<&str, Vec<ScoreValue>> = BTreeMap::new();
    for r in records {
        by_subject.entry(r.subject_id.as_str()).or_default().push(r.value);
    }

    let mut per_subject: Vec<SubjectAverage> = Vec::new();
    for s in subjects {
        let Some(values) = by_subject.get(s.id.as_str()) else {
            continue;
        };
        let tally = subject_average(values.iter().copied());
        per_subject.push(SubjectAverage {
            subject_id: s.id.clone(),
            name: s.name.clone(),
            coefficient: s.coefficient,
            average: tally.average,
            scored_count: tally.scored_count,
            absent_count: tally.absent_count,
            not_graded_count: tally.not_graded_count,
        });
    }

    let overall = overall_average(per_subject.iter().map(|s| (s.average, s.coefficient)));
    let appreciation = match (overall, max_score) {
        (Some(o), Some(max)) => Some(appreciation(o, max)),
        _ => None,
    };

    AveragesModel {
        student_id: student_id.to_string(),
        term,
        max_score,
        per_subject,
        overall,
        appreciation,
    }
}

/// Loads a student's records for `term` (all terms when `None`) and computes
/// their subject and overall averages with live coefficients.
pub fn compute_averages(
    conn: &Connection,
    student_id: &str,
    term: Option<i64>,
) -> GradeResult<AveragesModel> {
    let store = GradeStore::new(conn);
    let records = store.for_student(student_id, term)?;
    let subjects = catalog::list_subjects(conn)?;

    let mut max_score: Option<f64> = None;
    if !records.is_empty() {
        let settings = config::grading_settings(conn)?;
        for class_id in store.classes_for_student(student_id, term)? {
            let level = catalog::get_class(conn, &class_id)?.and_then(|c| c.level);
            let Some(scale) = settings.scale_for_level(level.as_deref()) else {
                return Err(GradeError::configuration(format!(
                    "no positive grading scale for class {}",
                    class_id
                )));
            };
            match max_score {
                None => max_score = Some(scale.max_score()),
                Some(m) if m != scale.max_score() => {
                    return Err(GradeError::configuration(
                        "student records span classes with different grading scales",
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(aggregate(student_id, term, max_score, &subjects, &records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::score::ScoreValue::{Absent, NotGraded, Numeric};

    #[test]
    fn plain_mean_of_numeric_marks() {
        let t = subject_average([Numeric(12.0), Numeric(16.0)]);
        assert_eq!(t.average, Some(14.0));
        assert_eq!(t.scored_count, 2);
    }

    #[test]
    fn sentinels_excluded_from_sum_and_count() {
        let t = subject_average([Absent, Numeric(15.0), NotGraded]);
        assert_eq!(t.average, Some(15.0));
        assert_eq!((t.scored_count, t.absent_count, t.not_graded_count), (1, 1, 1));

        let only_sentinels = subject_average([Absent, NotGraded]);
        assert_eq!(only_sentinels.average, None);
    }

    #[test]
    fn overall_is_coefficient_weighted() {
        let o = overall_average([(Some(14.0), 2.0), (Some(10.0), 1.0)]).unwrap();
        assert!((o - 38.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unavailable_subjects_do_not_drag_overall_down() {
        let o = overall_average([(Some(14.0), 2.0), (None, 5.0)]);
        assert_eq!(o, Some(14.0));
        assert_eq!(overall_average([(None, 1.0)]), None);
        assert_eq!(overall_average(Vec::<(Option<f64>, f64)>::new()), None);
    }

    #[test]
    fn zero_coefficients_make_overall_unavailable() {
        assert_eq!(overall_average([(Some(14.0), 0.0), (Some(8.0), 0.0)]), None);
        assert_eq!(overall_average([(Some(14.0), 0.0), (Some(8.0), 1.0)]), Some(8.0));
    }

    #[test]
    fn appreciation_bands_on_reference_scale() {
        assert_eq!(appreciation(16.0, 20.0), Appreciation::TresBien);
        assert_eq!(appreciation(15.99, 20.0), Appreciation::Bien);
        assert_eq!(appreciation(12.0, 20.0), Appreciation::AssezBien);
        assert_eq!(appreciation(10.0, 20.0), Appreciation::Passable);
        assert_eq!(appreciation(9.5, 20.0), Appreciation::Insuffisant);
        // 7/10 is 14/20.
        assert_eq!(appreciation(7.0, 10.0), Appreciation::Bien);
        assert_eq!(
            serde_json::to_value(appreciation(8.0, 10.0)).unwrap(),
            serde_json::json!("Très Bien")
        );
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        catalog::upsert_class(&conn, Some("c1"), "4e A", Some("4E")).unwrap();
        catalog::upsert_subject(&conn, Some("a"), "Anglais", 2.0).unwrap();
        catalog::upsert_subject(&conn, Some("b"), "Biologie", 1.0).unwrap();
        catalog::upsert_subject(&conn, Some("c"), "Chimie", 3.0).unwrap();
        conn
    }

    fn put(conn: &Connection, subject: &str, term: i64, student: &str, value: ScoreValue) {
        let ev = catalog::create_evaluation(conn, "c1", subject, Some(term), "devoir", None).unwrap();
        GradeStore::new(conn)
            .upsert(&GradeRecord {
                evaluation_id: ev.id,
                student_id: student.to_string(),
                subject_id: subject.to_string(),
                value,
                comment: None,
            })
            .unwrap();
    }

    #[test]
    fn compute_averages_over_store() {
        let conn = seeded();
        put(&conn, "a", 1, "s1", Numeric(12.0));
        put(&conn, "a", 1, "s1", Numeric(16.0));
        put(&conn, "b", 1, "s1", Absent);
        put(&conn, "b", 1, "s1", Numeric(10.0));
        put(&conn, "c", 1, "s1", NotGraded);
        put(&conn, "a", 2, "s1", Numeric(2.0));

        let m = compute_averages(&conn, "s1", Some(1)).unwrap();
        assert_eq!(m.max_score, Some(20.0));
        assert_eq!(m.per_subject.len(), 3);
        let a = m.per_subject.iter().find(|s| s.subject_id == "a").unwrap();
        assert_eq!(a.average, Some(14.0));
        let c = m.per_subject.iter().find(|s| s.subject_id == "c").unwrap();
        assert_eq!(c.average, None);
        let overall = m.overall.unwrap();
        assert!((overall - 38.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.appreciation, Some(Appreciation::AssezBien));
    }

    #[test]
    fn coefficient_edits_apply_retroactively() {
        let conn = seeded();
        put(&conn, "a", 1, "s1", Numeric(14.0));
        put(&conn, "b", 1, "s1", Numeric(10.0));
        let before = compute_averages(&conn, "s1", Some(1)).unwrap().overall.unwrap();
        catalog::set_subject_coefficient(&conn, "b", 2.0).unwrap();
        let after = compute_averages(&conn, "s1", Some(1)).unwrap().overall.unwrap();
        assert!((before - 38.0 / 3.0).abs() < 1e-12);
        assert!((after - 12.0).abs() < 1e-12);
    }

    #[test]
    fn student_without_records_has_nothing_available() {
        let conn = seeded();
        let m = compute_averages(&conn, "nobody", None).unwrap();
        assert!(m.per_subject.is_empty());
        assert_eq!(m.overall, None);
        assert_eq!(m.appreciation, None);
        assert_eq!(m.max_score, None);
    }
}

use crate::db;
use crate::score::GradingScale;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SetupSection {
    Grading,
    Sync,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Grading, SetupSection::Sync];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Sync => "sync",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Sync => "setup.sync",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "defaultMaxScore": 20.0,
            "earlyLevelMaxScore": 10.0,
            "earlyLevels": ["CI", "CP", "CE1"],
            "institutionMaxScore": null
        }),
        SetupSection::Sync => json!({
            "gradesCollection": "grades",
            "conflictKey": "evaluation_id,student_id",
            "maxRejections": 5,
            "requestTimeoutSecs": 15
        }),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSettings {
    pub default_max_score: f64,
    pub early_level_max_score: f64,
    pub early_levels: Vec<String>,
    pub institution_max_score: Option<f64>,
}

impl GradingSettings {
    /// Institution override first, then the early-level rule, then the default.
    pub fn scale_for_level(&self, level: Option<&str>) -> Option<GradingScale> {
        if let Some(max) = self.institution_max_score {
            return GradingScale::new(max);
        }
        let early = level
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| self.early_levels.iter().any(|e| e.eq_ignore_ascii_case(l)))
            .unwrap_or(false);
        if early {
            GradingScale::new(self.early_level_max_score)
        } else {
            GradingScale::new(self.default_max_score)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    pub grades_collection: String,
    pub conflict_key: String,
    pub max_rejections: u32,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        // The defaults above are static and always deserialize.
        serde_json::from_value(default_section(SetupSection::Sync)).unwrap_or(Self {
            grades_collection: "grades".to_string(),
            conflict_key: "evaluation_id,student_id".to_string(),
            max_rejections: 5,
            request_timeout_secs: 15,
        })
    }
}

fn parse_f64_range(v: &Value, key: &str, min_exclusive: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(n > min_exclusive && n <= max) {
        return Err(format!("{} must be in ({}, {}]", key, min_exclusive, max));
    }
    Ok(n)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "defaultMaxScore" | "earlyLevelMaxScore" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 1000.0)?));
                }
                "institutionMaxScore" => {
                    if v.is_null() {
                        obj.insert(k.clone(), Value::Null);
                    } else {
                        obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 1000.0)?));
                    }
                }
                "earlyLevels" => {
                    let arr = v
                        .as_array()
                        .ok_or_else(|| "earlyLevels must be an array of strings".to_string())?;
                    let mut levels = Vec::with_capacity(arr.len());
                    for item in arr {
                        levels.push(Value::String(
                            parse_string_max(item, "earlyLevels[]", 16)?.to_ascii_uppercase(),
                        ));
                    }
                    obj.insert(k.clone(), Value::Array(levels));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Sync => match k.as_str() {
                "gradesCollection" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 63)?));
                }
                "conflictKey" => {
                    let s = parse_string_max(v, k, 200)?;
                    if s.split(',').any(|c| c.trim().is_empty()) {
                        return Err("conflictKey must be a comma-separated column list".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "maxRejections" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 1000)?));
                }
                "requestTimeoutSecs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 300)?));
                }
                _ => return Err(format!("unknown sync field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed saved value falls back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn grading_settings(conn: &Connection) -> anyhow::Result<GradingSettings> {
    Ok(serde_json::from_value(load_section(
        conn,
        SetupSection::Grading,
    )?)?)
}

pub fn sync_settings(conn: &Connection) -> anyhow::Result<SyncSettings> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::Sync)?)?)
}

/// Remote data service credentials (`SUPABASE_URL`, `SUPABASE_ANON_KEY`).
#[derive(Debug, Clone)]
pub struct RemoteEnv {
    pub rest_endpoint: String,
    pub api_key: String,
}

impl RemoteEnv {
    pub fn new(url: &str, key: &str) -> Self {
        Self {
            rest_endpoint: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: key.to_string(),
        }
    }

    pub fn from_env() -> Option<Self> {
        match (
            std::env::var("SUPABASE_URL").ok(),
            std::env::var("SUPABASE_ANON_KEY").ok(),
        ) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Some(Self::new(url.trim(), key.trim()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn defaults_resolve_twenty_and_ten() {
        let conn = conn();
        let g = grading_settings(&conn).expect("grading");
        assert_eq!(g.scale_for_level(Some("6e")).map(|s| s.max_score()), Some(20.0));
        assert_eq!(g.scale_for_level(None).map(|s| s.max_score()), Some(20.0));
        assert_eq!(g.scale_for_level(Some("cp")).map(|s| s.max_score()), Some(10.0));
    }

    #[test]
    fn institution_override_wins() {
        let conn = conn();
        let patch = json!({ "institutionMaxScore": 100.0 });
        update_section(&conn, SetupSection::Grading, patch.as_object().unwrap())
            .expect("db")
            .expect("valid patch");
        let g = grading_settings(&conn).expect("grading");
        assert_eq!(g.scale_for_level(Some("CP")).map(|s| s.max_score()), Some(100.0));

        let patch = json!({ "institutionMaxScore": null });
        update_section(&conn, SetupSection::Grading, patch.as_object().unwrap())
            .expect("db")
            .expect("valid patch");
        let g = grading_settings(&conn).expect("grading");
        assert_eq!(g.scale_for_level(Some("CP")).map(|s| s.max_score()), Some(10.0));
    }

    #[test]
    fn invalid_patches_are_rejected_without_saving() {
        let conn = conn();
        for patch in [
            json!({ "defaultMaxScore": 0 }),
            json!({ "defaultMaxScore": "20" }),
            json!({ "earlyLevels": [""] }),
            json!({ "bogus": 1 }),
        ] {
            let res = update_section(&conn, SetupSection::Grading, patch.as_object().unwrap())
                .expect("db");
            assert!(res.is_err(), "patch {} should be rejected", patch);
        }
        let res = update_section(
            &conn,
            SetupSection::Sync,
            json!({ "conflictKey": "evaluation_id,," }).as_object().unwrap(),
        )
        .expect("db");
        assert!(res.is_err());
        assert_eq!(grading_settings(&conn).unwrap().default_max_score, 20.0);
    }

    #[test]
    fn sync_defaults() {
        let s = sync_settings(&conn()).expect("sync");
        assert_eq!(s.grades_collection, "grades");
        assert_eq!(s.conflict_key, "evaluation_id,student_id");
        assert_eq!(s.max_rejections, 5);
        assert_eq!(SyncSettings::default().request_timeout_secs, 15);
    }

    #[test]
    fn remote_env_builds_rest_endpoint() {
        let env = RemoteEnv::new("https://example.supabase.co/", "anon");
        assert_eq!(env.rest_endpoint, "https://example.supabase.co/rest/v1");
    }
}

use std::path::PathBuf;

use crate::sync::SyncEngine;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Created alongside `db` when a workspace is selected.
    pub sync: Option<SyncEngine>,
}

use crate::error::Result;
use crate::execution_gate::{IntentState, OrderIntent};
use crate::quote::{OutcomeSide, RawPrice, Venue};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Pending,
    DryRun,
    Confirmed,
    Cancelled,
    Expired,
}

impl From<IntentState> for WagerStatus {
    fn from(state: IntentState) -> Self {
        match state {
            IntentState::Pending => WagerStatus::Pending,
            IntentState::Confirmed => WagerStatus::Confirmed,
            IntentState::Cancelled => WagerStatus::Cancelled,
            IntentState::Expired => WagerStatus::Expired,
        }
    }
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerRecord {
    pub recorded_at: DateTime<Utc>,
    pub intent_id: Uuid,
    pub event_key: String,
    pub outcome_side: OutcomeSide,
    pub venue: Venue,
    pub source: String,
    pub status: WagerStatus,
    pub stake: f64,
    pub limit_price: RawPrice,
    #[serde(default)]
    pub edge_fraction: Option<f64>,
    /// Prices both venues showed when the intent was created.
    #[serde(default)]
    pub quoted: Option<(RawPrice, RawPrice)>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl WagerRecord {
    pub fn new(intent: &OrderIntent, status: WagerStatus) -> Self {
        Self {
            recorded_at: Utc::now(),
            intent_id: intent.intent_id,
            event_key: intent.event_key.to_string(),
            outcome_side: intent.outcome_side,
            venue: intent.venue,
            source: intent.source.clone(),
            status,
            stake: intent.stake_amount,
            limit_price: intent.limit_price,
            edge_fraction: None,
            quoted: None,
            detail: None,
        }
    }

    pub fn with_edge(
        mut self,
        edge_fraction: f64,
        sportsbook: RawPrice,
        prediction: RawPrice,
    ) -> Self {
        self.edge_fraction = Some(edge_fraction);
        self.quoted = Some((sportsbook, prediction));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only JSON-lines journal of intents and their outcomes.
pub struct WagerLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl WagerLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &WagerRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Every record in the journal. Unparseable lines are skipped.
    pub fn read_all(path: &Path) -> Result<Vec<WagerRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping corrupt wager log line: {}", e),
            }
        }
        Ok(records)
    }

    /// Quoted prices of the most recent intent per (event, side).
    pub fn latest_quotes(
        path: &Path,
    ) -> Result<HashMap<(String, OutcomeSide), (RawPrice, RawPrice)>> {
        let mut records = Self::read_all(path)?;
        records.sort_by_key(|r| r.recorded_at);
        Ok(records
            .into_iter()
            .filter_map(|r| Some(((r.event_key, r.outcome_side), r.quoted?)))
            .collect())
    }
}

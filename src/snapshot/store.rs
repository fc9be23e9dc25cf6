use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::engine::{Decision, DecisionReason};
use crate::runner::RunReport;
use crate::snapshot::migrations::BASE_MIGRATION;
use crate::types::{CampaignId, Device};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub run_id: String,
    pub captured_at: DateTime<Utc>,
    pub decision: Decision,
}

pub struct DecisionStore {
    conn: Connection,
}

impl DecisionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    /// Persists every decision of a run in one transaction.
    pub fn record_run(&mut self, report: &RunReport) -> Result<usize> {
        let captured_at = report.finished_at.unwrap_or(report.started_at).to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
INSERT INTO decision_history(
    run_id, campaign_id, campaign_name, device, lookback, old_value, new_value,
    target, conversions, reason, applied, captured_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
"#,
            )?;
            for d in &report.decisions {
                stmt.execute(params![
                    report.run_id,
                    d.campaign.as_str(),
                    d.campaign_name,
                    d.device.as_slug(),
                    d.window,
                    d.old,
                    d.new,
                    d.target,
                    d.conversions,
                    d.reason.as_slug(),
                    if d.applied { 1 } else { 0 },
                    captured_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(report.decisions.len())
    }

    pub fn load_history(
        &self,
        campaign: Option<&CampaignId>,
        limit: usize,
    ) -> Result<Vec<DecisionRecord>> {
        let sql = if campaign.is_some() {
            r#"
SELECT run_id, campaign_id, campaign_name, device, lookback, old_value, new_value,
       target, conversions, reason, applied, captured_at
FROM decision_history
WHERE campaign_id = ?1
ORDER BY id DESC
LIMIT ?2
"#
        } else {
            r#"
SELECT run_id, campaign_id, campaign_name, device, lookback, old_value, new_value,
       target, conversions, reason, applied, captured_at
FROM decision_history
ORDER BY id DESC
LIMIT ?1
"#
        };

        let mut stmt = self.conn.prepare(sql)?;
        let rows = if let Some(campaign) = campaign {
            stmt.query_map(params![campaign.as_str(), limit as i64], |row| {
                row_to_decision_record(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![limit as i64], |row| row_to_decision_record(row))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }
}

fn row_to_decision_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionRecord> {
    let device_raw: String = row.get(3)?;
    let device = device_raw.parse::<Device>().unwrap_or(Device::Other);
    let reason_raw: String = row.get(9)?;
    let reason = reason_raw
        .parse::<DecisionReason>()
        .unwrap_or(DecisionReason::WithinDeadBand);
    let captured_at_raw: String = row.get(11)?;
    let captured_at = DateTime::parse_from_rfc3339(&captured_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    Ok(DecisionRecord {
        run_id: row.get(0)?,
        captured_at,
        decision: Decision {
            campaign: CampaignId(row.get(1)?),
            campaign_name: row.get(2)?,
            device,
            window: row.get(4)?,
            old: row.get(5)?,
            new: row.get(6)?,
            target: row.get(7)?,
            conversions: row.get(8)?,
            reason,
            applied: row.get::<_, i64>(10)? != 0,
        },
    })
}

use anyhow::Result;

use crate::engine::Decision;
use crate::snapshot::store::DecisionRecord;

const HEADER: [&str; 10] = [
    "campaign_id",
    "campaign_name",
    "device",
    "window",
    "old",
    "new",
    "target",
    "conversions",
    "reason",
    "applied",
];

fn decision_fields(d: &Decision) -> Vec<String> {
    vec![
        d.campaign.to_string(),
        d.campaign_name.clone(),
        d.device.as_slug().to_string(),
        d.window.clone(),
        d.old.map(|v| format!("{v:.4}")).unwrap_or_default(),
        d.new.map(|v| format!("{v:.4}")).unwrap_or_default(),
        format!("{:.4}", d.target),
        format!("{:.2}", d.conversions),
        d.reason.to_string(),
        d.applied.to_string(),
    ]
}

pub fn decisions_to_csv(decisions: &[Decision]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(HEADER)?;
    for d in decisions {
        writer.write_record(decision_fields(d))?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn history_to_csv(records: &[DecisionRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    let mut header = vec!["run_id", "captured_at"];
    header.extend(HEADER);
    writer.write_record(header)?;
    for r in records {
        let mut fields = vec![r.run_id.clone(), r.captured_at.to_rfc3339()];
        fields.extend(decision_fields(&r.decision));
        writer.write_record(fields)?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecisionReason;
    use crate::types::Device;

    #[test]
    fn quotes_names_with_commas() {
        let decision = Decision {
            campaign: "5".into(),
            campaign_name: "Shoes, Boots".to_string(),
            device: Device::Desktop,
            window: "20230101,20231231".to_string(),
            old: Some(1.0),
            new: Some(1.05),
            target: 1.5,
            conversions: 12.0,
            reason: DecisionReason::Increase,
            applied: true,
        };
        let csv = decisions_to_csv(&[decision]).expect("csv");
        let mut lines = csv.lines();
        assert!(lines.next().expect("header").starts_with("campaign_id,"));
        assert_eq!(
            lines.next().expect("row"),
            "5,\"Shoes, Boots\",desktop,\"20230101,20231231\",1.0000,1.0500,1.5000,12.00,increase,true"
        );
    }
}

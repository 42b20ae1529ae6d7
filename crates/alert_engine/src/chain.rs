//! Per-incident alert hash chain verification.

use core_types::ROOT_HASH;
use serde::Serialize;
use thiserror::Error;

use crate::model::Alert;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainBreak {
    #[error("alert {alert_id} at position {index}: stored content hash does not match its fields")]
    ContentHashMismatch { index: usize, alert_id: String },
    #[error("alert {alert_id} at position {index}: prev_alert_hash {found} does not link to {expected}")]
    PrevHashMismatch {
        index: usize,
        alert_id: String,
        expected: String,
        found: String,
    },
    #[error("alert {alert_id} at position {index}: content could not be hashed: {reason}")]
    Unhashable {
        index: usize,
        alert_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub checked: usize,
    pub breaks: Vec<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }

    pub fn into_result(self) -> Result<usize, Vec<ChainBreak>> {
        if self.breaks.is_empty() {
            Ok(self.checked)
        } else {
            Err(self.breaks)
        }
    }
}

/// Check one incident's alerts in emission order.
///
/// Each link is judged against the hash recomputed from the previous alert's
/// fields, not its stored `content_hash`, so editing one alert flags that
/// alert and the link that follows it and nothing else.
pub fn verify_chain(alerts: &[Alert]) -> ChainReport {
    let mut report = ChainReport::default();
    let mut expected_prev = ROOT_HASH.to_string();

    for (index, alert) in alerts.iter().enumerate() {
        report.checked += 1;
        let recomputed = match alert.compute_content_hash() {
            Ok(hash) => {
                if hash != alert.content_hash {
                    report.breaks.push(ChainBreak::ContentHashMismatch {
                        index,
                        alert_id: alert.alert_id.clone(),
                    });
                }
                hash
            }
            Err(e) => {
                report.breaks.push(ChainBreak::Unhashable {
                    index,
                    alert_id: alert.alert_id.clone(),
                    reason: e.to_string(),
                });
                // Judge the next link against what was stored.
                alert.content_hash.clone()
            }
        };
        if alert.prev_alert_hash != expected_prev {
            report.breaks.push(ChainBreak::PrevHashMismatch {
                index,
                alert_id: alert.alert_id.clone(),
                expected: expected_prev.clone(),
                found: alert.prev_alert_hash.clone(),
            });
        }
        expected_prev = recomputed;
    }
    report
}

//! Fan a batch of evidence out over a bounded set of blocking workers.
//!
//! Items are grouped into lanes by dedup key. A lane runs on one worker
//! start to finish, so evidence for one incident is applied in input order;
//! different lanes run in parallel up to the worker limit.

use std::collections::HashMap;
use std::sync::Arc;

use incident_engine::RawEvidence;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// Position in the submitted batch.
    pub index: usize,
    pub event_id: String,
    pub incident_id: Option<String>,
    pub outcome: Option<&'static str>,
    pub error: Option<String>,
    pub error_kind: Option<&'static str>,
    pub retryable: bool,
}

impl ItemReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolReport {
    /// One entry per item that ran, ordered by `index`.
    pub items: Vec<ItemReport>,
    /// Lanes whose worker died before reporting.
    pub lost_lanes: usize,
}

impl PoolReport {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    pub fn retryable(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| i.retryable)
    }
}

pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every item once. Failures are reported per item, never retried.
    pub async fn run<I>(&self, items: I) -> PoolReport
    where
        I: IntoIterator<Item = RawEvidence>,
    {
        let lanes = into_lanes(items);
        let lane_count = lanes.len();
        let mut tasks = JoinSet::new();

        for lane in lanes {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!("worker pool semaphore closed");
                    break;
                }
            };
            let pipeline = self.pipeline.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                lane.into_iter()
                    .map(|(index, raw)| process_one(&pipeline, index, raw))
                    .collect::<Vec<_>>()
            });
        }

        let mut report = PoolReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(items) => report.items.extend(items),
                Err(e) => {
                    error!(error = %e, "worker lane aborted");
                    report.lost_lanes += 1;
                }
            }
        }
        report.items.sort_by_key(|i| i.index);

        info!(
            lanes = lane_count,
            workers = self.workers,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch processed"
        );
        report
    }
}

fn process_one(pipeline: &Pipeline, index: usize, raw: RawEvidence) -> ItemReport {
    let event_id = raw.event_id.clone();
    match pipeline.process(raw) {
        Ok(out) => ItemReport {
            index,
            event_id,
            incident_id: Some(out.incident.snapshot.incident_id),
            outcome: Some(out.alert.kind()),
            error: None,
            error_kind: None,
            retryable: false,
        },
        Err(e) => {
            warn!(
                index,
                event_id = %event_id,
                stage = e.stage(),
                kind = e.kind(),
                retryable = e.is_retryable(),
                "evidence item failed"
            );
            ItemReport {
                index,
                event_id,
                incident_id: None,
                outcome: None,
                error_kind: Some(e.kind()),
                retryable: e.is_retryable(),
                error: Some(e.to_string()),
            }
        }
    }
}

fn lane_key(raw: &RawEvidence) -> String {
    raw.dedup_key().unwrap_or_default()
}

/// Group items by dedup key, keeping input order within and across lanes.
fn into_lanes<I>(items: I) -> Vec<Vec<(usize, RawEvidence)>>
where
    I: IntoIterator<Item = RawEvidence>,
{
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut lanes: Vec<Vec<(usize, RawEvidence)>> = Vec::new();
    for (index, raw) in items.into_iter().enumerate() {
        let key = lane_key(&raw);
        let slot = *slots.entry(key).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[slot].push((index, raw));
    }
    lanes
}

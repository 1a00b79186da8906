//! Scripted in-memory actor client for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use brandbrain_protocol::ActorRunStatus;

use crate::client::ActorClient;
use crate::error::{ActorClientError, Result};
use crate::types::RunInfo;

/// One scripted run, consumed by the next `start_run` call.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Status sequence returned by successive `get_run` calls; the last
    /// entry repeats. Defaults to an immediate SUCCEEDED.
    pub statuses: Vec<ActorRunStatus>,
    /// Dataset items for this run.
    pub items: Vec<Value>,
    /// When set, `start_run` fails with a transport error instead.
    pub start_error: Option<String>,
}

impl Default for ScriptedRun {
    fn default() -> Self {
        Self {
            statuses: vec![ActorRunStatus::Succeeded],
            items: Vec::new(),
            start_error: None,
        }
    }
}

impl ScriptedRun {
    pub fn succeeded(items: Vec<Value>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn terminal(status: ActorRunStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    /// A run that never leaves RUNNING; polling it exhausts the wall budget.
    pub fn never_finishes() -> Self {
        Self {
            statuses: vec![ActorRunStatus::Running],
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct MockState {
    script: VecDeque<ScriptedRun>,
    next_id: u32,
    runs: HashMap<String, RunState>,
    datasets: HashMap<String, Vec<Value>>,
    started: Vec<(String, Value)>,
    poll_counts: HashMap<String, u32>,
}

struct RunState {
    dataset_id: String,
    statuses: Vec<ActorRunStatus>,
    polls: usize,
}

/// In-memory `ActorClient`. Runs are scripted up front with
/// [`MockActorClient::enqueue`]; unscripted starts succeed immediately with
/// no items.
#[derive(Default)]
pub struct MockActorClient {
    state: Mutex<MockState>,
}

impl MockActorClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the behavior for the next started run.
    pub fn enqueue(&self, run: ScriptedRun) {
        self.state.lock().unwrap().script.push_back(run);
    }

    /// (actor_id, input) pairs of every `start_run` call, in order.
    pub fn started_runs(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().started.clone()
    }

    /// How many times `get_run` was called for a run.
    pub fn poll_count(&self, run_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .poll_counts
            .get(run_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ActorClient for MockActorClient {
    async fn start_run(&self, actor_id: &str, input: &Value) -> Result<RunInfo> {
        let mut state = self.state.lock().unwrap();
        let scripted = state.script.pop_front().unwrap_or_default();
        if let Some(message) = scripted.start_error {
            return Err(ActorClientError::Transport(message));
        }

        state.next_id += 1;
        let run_id = format!("mock-run-{}", state.next_id);
        let dataset_id = format!("mock-ds-{}", state.next_id);

        state.started.push((actor_id.to_string(), input.clone()));
        state.datasets.insert(dataset_id.clone(), scripted.items);
        let first_status = *scripted
            .statuses
            .first()
            .unwrap_or(&ActorRunStatus::Succeeded);
        state.runs.insert(
            run_id.clone(),
            RunState {
                dataset_id: dataset_id.clone(),
                statuses: scripted.statuses,
                polls: 0,
            },
        );

        Ok(RunInfo {
            run_id,
            dataset_id,
            status: first_status,
            started_at: None,
            finished_at: None,
        })
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        let mut state = self.state.lock().unwrap();
        *state.poll_counts.entry(run_id.to_string()).or_insert(0) += 1;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| ActorClientError::Api {
                status: 404,
                body: format!("Run {run_id} not found"),
            })?;
        let status = run
            .statuses
            .get(run.polls)
            .or_else(|| run.statuses.last())
            .copied()
            .unwrap_or(ActorRunStatus::Succeeded);
        run.polls += 1;
        let dataset_id = run.dataset_id.clone();
        Ok(RunInfo {
            run_id: run_id.to_string(),
            dataset_id,
            status,
            started_at: None,
            finished_at: None,
        })
    }

    async fn fetch_items(&self, dataset_id: &str, limit: u32, offset: u32) -> Result<Vec<Value>> {
        let state = self.state.lock().unwrap();
        let items = state
            .datasets
            .get(dataset_id)
            .ok_or_else(|| ActorClientError::Api {
                status: 404,
                body: format!("Dataset {dataset_id} not found"),
            })?;
        Ok(items
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_poll_reaches_terminal() {
        let client = MockActorClient::new();
        client.enqueue(ScriptedRun {
            statuses: vec![
                ActorRunStatus::Running,
                ActorRunStatus::Running,
                ActorRunStatus::Succeeded,
            ],
            items: vec![json!({"n": 1})],
            start_error: None,
        });

        let run = client.start_run("acme~actor", &json!({})).await.unwrap();
        let info = client
            .poll_run(&run.run_id, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(info.status, ActorRunStatus::Succeeded);
        assert_eq!(client.poll_count(&run.run_id), 3);
    }

    #[tokio::test]
    async fn test_poll_times_out_on_stuck_run() {
        let client = MockActorClient::new();
        client.enqueue(ScriptedRun::never_finishes());

        let run = client.start_run("acme~actor", &json!({})).await.unwrap();
        let err = client
            .poll_run(
                &run.run_id,
                Duration::from_millis(20),
                Duration::from_millis(5),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_fetch_items_honors_limit_and_offset() {
        let client = MockActorClient::new();
        client.enqueue(ScriptedRun::succeeded(vec![
            json!({"n": 0}),
            json!({"n": 1}),
            json!({"n": 2}),
        ]));

        let run = client.start_run("acme~actor", &json!({})).await.unwrap();
        let items = client.fetch_items(&run.dataset_id, 2, 1).await.unwrap();
        assert_eq!(items, vec![json!({"n": 1}), json!({"n": 2})]);
    }
}

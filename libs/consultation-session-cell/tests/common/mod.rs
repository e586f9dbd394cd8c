#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{timeout, Duration};

use consultation_session_cell::*;
use realtime_cell::{
    ChangeOperation, ChangeStream, PushSource, RawChangeEvent, RealtimeChannelManager, RealtimeError,
    RealtimeSubscription,
};
use shared_models::{ConsultationSnapshot, RemoteError, SessionPhase};
use shared_utils::test_utils::{fixed_server_time, seconds_after};

pub const CONSULTATION_ID: &str = "c-1";

pub fn snapshot(status: SessionPhase) -> ConsultationSnapshot {
    ConsultationSnapshot {
        consultation_id: CONSULTATION_ID.to_string(),
        status,
        service_type: Some("general".to_string()),
        fee: Some(25.0),
        scheduled_end_at: None,
        extension_count: 0,
        grace_period_end_at: None,
        original_duration_minutes: Some(15),
        session_start_time: None,
        server_time: fixed_server_time(),
    }
}

pub fn active_ending_in(seconds: i64) -> ConsultationSnapshot {
    ConsultationSnapshot {
        scheduled_end_at: Some(seconds_after(fixed_server_time(), seconds)),
        ..snapshot(SessionPhase::Active)
    }
}

pub fn grace_ending_in(seconds: i64) -> ConsultationSnapshot {
    ConsultationSnapshot {
        grace_period_end_at: Some(seconds_after(fixed_server_time(), seconds)),
        ..snapshot(SessionPhase::GracePeriod)
    }
}

/// Action service answering each action with its scripted outcome until re-scripted.
#[derive(Default)]
pub struct ScriptedActions {
    scripts: Mutex<HashMap<&'static str, Result<ConsultationSnapshot, RemoteError>>>,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    calls: Mutex<Vec<SessionAction>>,
}

impl ScriptedActions {
    pub fn respond(&self, action: &'static str, outcome: Result<ConsultationSnapshot, RemoteError>) -> &Self {
        self.scripts.lock().unwrap().insert(action, outcome);
        self
    }

    /// Holds calls of `action` until the returned gate is notified.
    pub fn gate(&self, action: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(action, Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> Vec<SessionAction> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.calls().iter().filter(|a| a.name() == action).count()
    }

    fn next(&self, action: &'static str) -> Result<ConsultationSnapshot, RemoteError> {
        self.scripts
            .lock()
            .unwrap()
            .get(action)
            .cloned()
            .unwrap_or_else(|| Err(RemoteError::application("unscripted", action)))
    }
}

#[async_trait]
impl ActionService for ScriptedActions {
    async fn perform(
        &self,
        _consultation_id: &str,
        action: &SessionAction,
    ) -> Result<ConsultationSnapshot, RemoteError> {
        self.calls.lock().unwrap().push(action.clone());

        let gate = self.gates.lock().unwrap().get(action.name()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.next(action.name())
    }
}

/// Push source whose single live connection is fed by the test.
pub struct StatusSource {
    sender: Mutex<Option<mpsc::UnboundedSender<Result<RawChangeEvent, RealtimeError>>>>,
    connected: watch::Sender<bool>,
}

impl Default for StatusSource {
    fn default() -> Self {
        Self {
            sender: Mutex::new(None),
            connected: watch::channel(false).0,
        }
    }
}

impl StatusSource {
    pub fn push_status(&self, status: &str) {
        let mut record = Map::new();
        record.insert("id".to_string(), Value::String(CONSULTATION_ID.to_string()));
        record.insert("status".to_string(), Value::String(status.to_string()));
        self.push(record);
    }

    pub fn push(&self, record: Map<String, Value>) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(RawChangeEvent::new("consultations", ChangeOperation::Update, record)));
        }
    }

    pub async fn wait_connected(&self) {
        let mut connected = self.connected.subscribe();
        connected.wait_for(|c| *c).await.unwrap();
    }
}

#[async_trait]
impl PushSource for StatusSource {
    async fn connect(&self, _subscription: &RealtimeSubscription) -> Result<ChangeStream, RealtimeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        self.connected.send_replace(true);

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

pub struct Harness {
    pub manager: SessionManager,
    pub actions: Arc<ScriptedActions>,
    pub source: Arc<StatusSource>,
    pub realtime: Arc<RealtimeChannelManager>,
}

impl Harness {
    pub fn new() -> Self {
        let actions = Arc::new(ScriptedActions::default());
        let source = Arc::new(StatusSource::default());
        let push: Arc<dyn PushSource> = source.clone();
        let realtime = Arc::new(RealtimeChannelManager::new(push));
        let service: Arc<dyn ActionService> = actions.clone();

        let manager = SessionManager::new(
            service,
            Arc::clone(&realtime),
            TimeReconciler::default(),
            SessionConfig::default(),
        );

        Self {
            manager,
            actions,
            source,
            realtime,
        }
    }

    /// Waits, on the paused clock, until the published state satisfies `predicate`.
    pub async fn wait_until<F>(&self, predicate: F) -> SessionState
    where
        F: Fn(&SessionState) -> bool,
    {
        let mut states = self.manager.subscribe_state();
        let state = timeout(Duration::from_secs(600), states.wait_for(|s| predicate(s)))
            .await
            .expect("state never reached")
            .expect("session actor stopped");
        state.clone()
    }
}

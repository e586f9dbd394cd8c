use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use realtime_cell::{ConsultationStatusChanged, RealtimeChannelManager, RealtimeSubscription, Topic};
use shared_models::{ConsultationSnapshot, RemoteError, SessionPhase};

use crate::models::epoch_ms;
use crate::services::action::ActionService;
use crate::services::reconciler::{Reconciliation, TimeReconciler};
use crate::services::timer::CountdownTimer;
use crate::{SessionAction, SessionConfig, SessionError, SessionState, TimerAnchor, TimerSignal};

type Reply = oneshot::Sender<Result<(), SessionError>>;
type ActionOutcome = Result<(ConsultationSnapshot, Reconciliation), RemoteError>;

enum Command {
    Start {
        consultation_id: String,
        reply: Reply,
    },
    Perform {
        action: SessionAction,
        reply: Option<Reply>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Timer {
        generation: u64,
        signal: TimerSignal,
    },
    Realtime {
        epoch: u64,
        event: ConsultationStatusChanged,
    },
    Completed {
        epoch: u64,
        // Timer generation when the call went out.
        generation: u64,
        action: SessionAction,
        outcome: ActionOutcome,
        reply: Option<Reply>,
    },
}

/// Handle to the session actor of one consultation.
///
/// Every operation is a command to the actor, which is the only writer of
/// [`SessionState`]. Clones share the same actor; it shuts down with the last handle.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionManager {
    /// Spawns the actor on the current tokio runtime.
    pub fn new(
        actions: Arc<dyn ActionService>,
        realtime: Arc<RealtimeChannelManager>,
        reconciler: TimeReconciler,
        config: SessionConfig,
    ) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::default());

        let actor = SessionActor {
            actions,
            realtime,
            reconciler: Arc::new(reconciler),
            timer: CountdownTimer::new(config.tick_interval),
            timer_generation: 0,
            pending_expiry: None,
            epoch: 0,
            state: SessionState::default(),
            state_tx,
            inbox: commands.downgrade(),
        };
        tokio::spawn(actor.run(inbox));

        Self { commands, state }
    }

    /// Resets state, subscribes to the consultation's status row and resolves with the first sync.
    pub async fn start(&self, consultation_id: impl Into<String>) -> Result<(), SessionError> {
        let consultation_id = consultation_id.into();
        self.request(|reply| Command::Start { consultation_id, reply }).await
    }

    pub async fn sync_with_server(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::Sync).await
    }

    pub async fn end_consultation(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::End).await
    }

    pub async fn request_extension(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::RequestExtension).await
    }

    pub async fn accept_extension(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::AcceptExtension).await
    }

    pub async fn decline_extension(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::DeclineExtension).await
    }

    pub async fn payment_confirmed(&self, payment_id: impl Into<String>) -> Result<(), SessionError> {
        self.perform(SessionAction::PaymentConfirmed {
            payment_id: payment_id.into(),
        })
        .await
    }

    pub async fn cancel_payment(&self) -> Result<(), SessionError> {
        self.perform(SessionAction::CancelPayment).await
    }

    /// Cancels the countdown and the realtime subscription and resets to the empty state.
    /// Nothing from the previous session is applied after this returns.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).is_ok() {
            let _ = done.await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn perform(&self, action: SessionAction) -> Result<(), SessionError> {
        self.request(|reply| Command::Perform {
            action,
            reply: Some(reply),
        })
        .await
    }

    async fn request<F>(&self, command: F) -> Result<(), SessionError>
    where
        F: FnOnce(Reply) -> Command,
    {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::ManagerUnavailable)?;
        outcome.await.map_err(|_| SessionError::ManagerUnavailable)?
    }
}

struct SessionActor {
    actions: Arc<dyn ActionService>,
    realtime: Arc<RealtimeChannelManager>,
    reconciler: Arc<TimeReconciler>,
    timer: CountdownTimer,
    // Bumped on every timer start and stop, so signals of a replaced countdown are dropped.
    timer_generation: u64,
    // Timer generation whose expiry is awaiting the remote `timer_expired` reply.
    pending_expiry: Option<u64>,
    // Bumped on every start and stop, so replies and pushes for a previous session are dropped.
    epoch: u64,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    inbox: mpsc::WeakUnboundedSender<Command>,
}

impl SessionActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            self.handle(command).await;
        }

        debug!("All session handles dropped, shutting down actor");
        self.reset().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { consultation_id, reply } => self.start(consultation_id, reply).await,
            Command::Perform { action, reply } => self.dispatch(action, reply),
            Command::Stop { reply } => {
                self.reset().await;
                let _ = reply.send(());
            }
            Command::Timer { generation, signal } => {
                if generation == self.timer_generation {
                    self.on_timer(signal);
                }
            }
            Command::Realtime { epoch, event } => {
                if epoch == self.epoch && self.state.consultation_id.as_deref() == Some(event.consultation_id.as_str()) {
                    self.on_status_changed(event);
                }
            }
            Command::Completed {
                epoch,
                generation,
                action,
                outcome,
                reply,
            } => {
                if epoch != self.epoch {
                    debug!("Discarding {} reply for a stopped session", action.name());
                    respond(reply, Err(SessionError::Stopped));
                    return;
                }
                self.on_completed(action, generation, outcome, reply);
            }
        }
    }

    #[instrument(skip(self, reply))]
    async fn start(&mut self, consultation_id: String, reply: Reply) {
        self.reset().await;
        info!("Starting consultation session {}", consultation_id);

        self.state.consultation_id = Some(consultation_id.clone());
        self.publish();

        let inbox = self.inbox.clone();
        let epoch = self.epoch;
        self.realtime
            .subscribe(
                Topic::ConsultationStatus,
                RealtimeSubscription::consultation_status(&consultation_id),
                move |event: ConsultationStatusChanged| {
                    if let Some(tx) = inbox.upgrade() {
                        let _ = tx.send(Command::Realtime { epoch, event });
                    }
                },
            )
            .await;

        self.dispatch(SessionAction::Sync, Some(reply));
    }

    async fn reset(&mut self) {
        self.stop_timer();
        self.pending_expiry = None;
        self.epoch += 1;
        self.realtime.unsubscribe(Topic::ConsultationStatus).await;

        if self.state.is_started() {
            info!("Stopped consultation session {:?}", self.state.consultation_id);
        }
        self.state = SessionState::default();
        self.publish();
    }

    // Runs the remote call off the actor; the reply comes back as `Command::Completed`.
    fn dispatch(&mut self, action: SessionAction, reply: Option<Reply>) {
        let Some(consultation_id) = self.state.consultation_id.clone() else {
            respond(reply, Err(SessionError::NotStarted));
            return;
        };
        let Some(tx) = self.inbox.upgrade() else {
            respond(reply, Err(SessionError::ManagerUnavailable));
            return;
        };

        let actions = Arc::clone(&self.actions);
        let reconciler = Arc::clone(&self.reconciler);
        let epoch = self.epoch;
        let generation = self.timer_generation;

        tokio::spawn(async move {
            let outcome = actions
                .perform(&consultation_id, &action)
                .await
                .map(|snapshot| {
                    let reconciliation = reconciler.reconcile(&snapshot);
                    (snapshot, reconciliation)
                });
            let _ = tx.send(Command::Completed {
                epoch,
                generation,
                action,
                outcome,
                reply,
            });
        });
    }

    fn on_timer(&mut self, signal: TimerSignal) {
        match signal {
            TimerSignal::Tick(remaining) => {
                let seconds = remaining.as_secs();
                if seconds != self.state.remaining_seconds {
                    self.state.remaining_seconds = seconds;
                    self.publish();
                }
            }
            TimerSignal::Expired => self.on_expired(),
        }
    }

    fn on_expired(&mut self) {
        match self.state.phase {
            SessionPhase::Active => {
                info!("Active countdown expired, asking server to advance");
                self.pending_expiry = Some(self.timer_generation);
                self.dispatch(SessionAction::TimerExpired, None);
            }
            SessionPhase::GracePeriod => {
                info!("Grace period expired, awaiting extension locally");
                self.enter_awaiting_extension();
                self.publish();
            }
            SessionPhase::AwaitingExtension | SessionPhase::Completed => {}
        }
    }

    fn on_status_changed(&mut self, event: ConsultationStatusChanged) {
        debug!("Status push: {}", event.phase);
        let previous = self.state.phase;

        self.state.phase = event.phase;
        if let Some(requested) = event.extension_requested {
            self.state.extension_requested = requested;
        }
        if let Some(declined) = event.patient_declined {
            self.state.patient_declined = declined;
        }
        if let Some(count) = event.extension_count {
            self.state.extension_count = count;
        }

        // The running anchor belongs to the old phase.
        if event.phase != previous || !event.phase.is_timed() {
            self.stop_timer();
        }
        if !event.phase.is_timed() {
            self.state.remaining_seconds = 0;
        }
        if event.phase.is_terminal() && previous != event.phase {
            info!("Consultation {} completed", event.consultation_id);
        }
        self.publish();

        if event.phase.is_timed() {
            self.dispatch(SessionAction::Sync, None);
        }
    }

    fn on_completed(&mut self, action: SessionAction, generation: u64, outcome: ActionOutcome, reply: Option<Reply>) {
        match outcome {
            Ok((snapshot, reconciliation)) => {
                self.apply_success(&action, generation, &snapshot, reconciliation);
                self.publish();
                respond(reply, Ok(()));
            }
            Err(error) => {
                self.apply_failure(&action, generation, &error);
                respond(reply, Err(SessionError::Remote(error)));
            }
        }
    }

    fn apply_success(
        &mut self,
        action: &SessionAction,
        generation: u64,
        snapshot: &ConsultationSnapshot,
        reconciliation: Reconciliation,
    ) {
        match action {
            SessionAction::Sync => {
                self.state.error = None;
                self.adopt(snapshot, reconciliation);
            }
            SessionAction::TimerExpired => {
                if !self.expiry_still_current(generation) {
                    debug!("Newer state arrived while timer_expired was in flight, ignoring its reply");
                } else if reconciliation.phase == SessionPhase::Active && reconciliation.anchor.remaining().is_zero() {
                    // Re-arming an elapsed countdown would expire again at once.
                    warn!("Server still reports an elapsed active session, awaiting extension locally");
                    self.adopt(snapshot, reconciliation);
                    self.enter_awaiting_extension();
                } else {
                    self.adopt(snapshot, reconciliation);
                }
            }
            SessionAction::End | SessionAction::AcceptExtension => self.adopt(snapshot, reconciliation),
            SessionAction::RequestExtension => {
                self.adopt(snapshot, reconciliation);
                self.state.extension_requested = true;
            }
            SessionAction::DeclineExtension => {
                self.adopt(snapshot, reconciliation);
                self.state.patient_declined = true;
                self.state.extension_requested = false;
            }
            SessionAction::PaymentConfirmed { .. } => {
                self.state.extension_requested = false;
                self.state.patient_declined = false;
                self.stop_timer();
                self.dispatch(SessionAction::Sync, None);
            }
            SessionAction::CancelPayment => self.enter_awaiting_extension(),
        }
    }

    fn apply_failure(&mut self, action: &SessionAction, generation: u64, error: &RemoteError) {
        match action {
            SessionAction::Sync => {
                warn!("Sync failed: {}", error);
                self.state.error = Some(error.to_string());
                self.publish();
            }
            SessionAction::TimerExpired => {
                // Guard on the phase now, not the phase when the call went out.
                if self.expiry_still_current(generation) && self.state.phase == SessionPhase::Active {
                    warn!("timer_expired failed ({}), awaiting extension locally", error);
                    self.enter_awaiting_extension();
                    self.state.error = Some(error.to_string());
                    self.publish();
                } else {
                    debug!("timer_expired failed after a newer state arrived: {}", error);
                }
            }
            _ => debug!("{} failed: {}", action.name(), error),
        }
    }

    // True while no sync or push has replaced the countdown that expired. Only the
    // reply to the outstanding expiry clears it.
    fn expiry_still_current(&mut self, generation: u64) -> bool {
        if self.pending_expiry != Some(generation) || generation != self.timer_generation {
            return false;
        }
        self.pending_expiry = None;
        true
    }

    fn adopt(&mut self, snapshot: &ConsultationSnapshot, reconciliation: Reconciliation) {
        let state = &mut self.state;
        state.phase = reconciliation.phase;
        state.extension_count = snapshot.extension_count;
        state.scheduled_end_at_epoch_ms = epoch_ms(snapshot.scheduled_end_at);
        state.grace_period_end_at_epoch_ms = epoch_ms(snapshot.grace_period_end_at);
        if let Some(minutes) = snapshot.original_duration_minutes {
            state.original_duration_minutes = minutes;
        }
        if snapshot.service_type.is_some() {
            state.service_type = snapshot.service_type.clone();
        }
        if snapshot.fee.is_some() {
            state.fee = snapshot.fee;
        }

        if reconciliation.phase.is_timed() {
            self.state.remaining_seconds = reconciliation.anchor.remaining().as_secs();
            self.start_timer(reconciliation.anchor);
        } else {
            self.stop_timer();
            self.state.remaining_seconds = 0;
            if reconciliation.phase.is_terminal() {
                debug!("Server reports consultation completed");
            }
        }
    }

    fn enter_awaiting_extension(&mut self) {
        self.stop_timer();
        self.state.phase = SessionPhase::AwaitingExtension;
        self.state.remaining_seconds = 0;
    }

    fn start_timer(&mut self, anchor: TimerAnchor) {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let inbox = self.inbox.clone();

        self.timer.start(anchor, move |signal| {
            if let Some(tx) = inbox.upgrade() {
                let _ = tx.send(Command::Timer { generation, signal });
            }
        });
    }

    fn stop_timer(&mut self) {
        self.timer_generation += 1;
        self.timer.stop();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }
}

fn respond(reply: Option<Reply>, result: Result<(), SessionError>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

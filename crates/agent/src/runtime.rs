use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use switchboard_core::realtime::{RealtimeEvent, RealtimeHub};
use switchboard_core::{Appointment, CallDialer, RecordStore, Reminder, StoreError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationState, DialogueEngine, DialogueTurn, FlowEffect};
use crate::rules::{replies, DialogueAction};

const MAX_SESSION_ID_LEN: usize = 128;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub session_id: String,
    pub reply: String,
    pub action: DialogueAction,
}

/// `last_active` sits outside the state lock so a lookup can refresh it while
/// the session map is still borrowed; eviction only runs under the map's
/// write lock and therefore never sees a session between lookup and turn.
struct Session {
    state: Mutex<ConversationState>,
    last_active: StdMutex<Instant>,
}

impl Session {
    fn new() -> Self {
        Self { state: Mutex::new(ConversationState::idle()), last_active: StdMutex::new(Instant::now()) }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_active(&self) -> Instant {
        *self.last_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle sessions only; a session mid-turn holds its state lock.
    fn is_idle(&self) -> bool {
        self.state.try_lock().is_ok()
    }
}

/// Collaborators a dialogue turn may touch.
#[derive(Clone)]
pub struct DialogueServices {
    pub reminders: Arc<dyn RecordStore<Reminder>>,
    pub appointments: Arc<dyn RecordStore<Appointment>>,
    pub dialer: Arc<dyn CallDialer>,
    pub hub: RealtimeHub,
}

/// Owns one `ConversationState` per session and runs turns against it.
///
/// Turns of the same session are serialized by that session's lock, which is
/// held across the turn's side effect; other sessions proceed independently.
pub struct DialogueRuntime {
    engine: DialogueEngine,
    services: DialogueServices,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    session_ttl: Duration,
    max_sessions: usize,
}

impl DialogueRuntime {
    pub fn new(engine: DialogueEngine, services: DialogueServices, session_ttl: Duration) -> Self {
        Self {
            engine,
            services,
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Caps live sessions; opening one past the cap drops the least recently
    /// active idle session.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub async fn handle_message(&self, session_id: Option<&str>, message: &str) -> TurnReply {
        let session_id = resolve_session_id(session_id);
        let session = self.session(&session_id).await;
        let mut state = session.state.lock().await;

        let turn = self.engine.apply(&state, message);
        let from = state.active_flow;
        let (reply, action, next_state) = self.execute(&session_id, &state, turn).await;

        info!(
            event_name = "dialogue.turn.completed",
            correlation_id = %session_id,
            from_flow = ?from,
            to_flow = ?next_state.active_flow,
            action = action.as_str(),
            "dialogue turn completed"
        );
        *state = next_state;
        session.touch();

        TurnReply { session_id, reply, action }
    }

    /// Runs the turn's side effect; the returned state is what gets committed.
    async fn execute(
        &self,
        session_id: &str,
        current: &ConversationState,
        turn: DialogueTurn,
    ) -> (String, DialogueAction, ConversationState) {
        let DialogueTurn { reply, action, next_state, effect, collected_fields } = turn;
        let Some(effect) = effect else {
            return (reply, action, next_state);
        };

        debug!(
            correlation_id = %session_id,
            fields = ?collected_fields,
            "dialogue turn collected a complete record"
        );

        match effect {
            FlowEffect::PersistReminder(reminder) => {
                match self.persist_reminder(reminder).await {
                    Ok(()) => (reply, action, next_state),
                    Err(error) => self.save_failed(session_id, current, &error),
                }
            }
            FlowEffect::PersistAppointment(appointment) => {
                match self.persist_appointment(appointment).await {
                    Ok(()) => (reply, action, next_state),
                    Err(error) => self.save_failed(session_id, current, &error),
                }
            }
            FlowEffect::OriginateCall { from, to } => {
                let result = self.services.dialer.originate(&from, &to).await;
                if result.is_accepted() {
                    (reply, action, next_state)
                } else {
                    warn!(
                        event_name = "dialogue.originate.failed",
                        correlation_id = %session_id,
                        outcome = %result.describe(),
                        "advisor call could not be placed"
                    );
                    // No retry: a second attempt could ring the advisor twice.
                    (replies::ADVISOR_UNREACHABLE.to_owned(), DialogueAction::Done, next_state)
                }
            }
        }
    }

    async fn persist_reminder(&self, reminder: Reminder) -> Result<(), StoreError> {
        self.services.reminders.append(reminder).await?;
        match self.services.reminders.list_all().await {
            Ok(all) => {
                self.services.hub.publish(RealtimeEvent::RemindersUpdated(all));
            }
            Err(error) => warn!(error = %error, "reminder saved but the list could not be reloaded"),
        }
        Ok(())
    }

    async fn persist_appointment(&self, appointment: Appointment) -> Result<(), StoreError> {
        self.services.appointments.append(appointment).await?;
        match self.services.appointments.list_all().await {
            Ok(all) => {
                self.services.hub.publish(RealtimeEvent::AppointmentsUpdated(all));
            }
            Err(error) => {
                warn!(error = %error, "appointment saved but the list could not be reloaded")
            }
        }
        Ok(())
    }

    fn save_failed(
        &self,
        session_id: &str,
        current: &ConversationState,
        error: &StoreError,
    ) -> (String, DialogueAction, ConversationState) {
        warn!(
            event_name = "dialogue.persist.failed",
            correlation_id = %session_id,
            error = %error,
            "dialogue record could not be saved"
        );
        let retry_state = ConversationState::in_flow(current.active_flow);
        (replies::SAVE_FAILED.to_owned(), current.active_flow.pending_action(), retry_state)
    }

    /// Looks up or opens a session, refreshing its activity while the map
    /// lock is held.
    async fn session(&self, session_id: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            session.touch();
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(session_id) {
            session.touch();
            return session.clone();
        }

        if sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, session)| session.is_idle())
                .min_by_key(|(_, session)| session.last_active())
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    debug!(
                        event_name = "dialogue.sessions.capped",
                        correlation_id = %id,
                        max_sessions = self.max_sessions,
                        "dropped the least recently active session"
                    );
                }
                None => warn!(
                    event_name = "dialogue.sessions.over_capacity",
                    max_sessions = self.max_sessions,
                    "every session is mid-turn; opening one past the cap"
                ),
            }
        }

        let session = Arc::new(Session::new());
        sessions.insert(session_id.to_owned(), session.clone());
        session
    }

    /// Snapshot of a session's state, if the session exists.
    pub async fn state_of(&self, session_id: &str) -> Option<ConversationState> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        let state = session.state.lock().await;
        Some(state.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops sessions idle for longer than the TTL. Sessions mid-turn are kept.
    pub async fn evict_inactive(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            !session.is_idle()
                || now.saturating_duration_since(session.last_active()) < self.session_ttl
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(event_name = "dialogue.sessions.evicted", evicted, "evicted idle dialogue sessions");
        }
        evicted
    }

    /// Periodic eviction sweep until `shutdown` flips to true.
    pub fn spawn_eviction(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.evict_inactive().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn resolve_session_id(candidate: Option<&str>) -> String {
    match candidate.map(str::trim) {
        Some(id) if !id.is_empty() && id.len() <= MAX_SESSION_ID_LEN => id.to_owned(),
        _ => uuid::Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use switchboard_core::realtime::RealtimeHub;
    use switchboard_core::{
        Appointment, CallDialer, OriginateResult, RecordStore, RejectReason, Reminder, StoreError,
    };
    use tokio::sync::Mutex;

    use super::{DialogueRuntime, DialogueServices};
    use crate::conversation::{ActiveFlow, DialogueEngine};
    use crate::rules::{replies, DialogueAction};

    struct FakeStore<R> {
        records: Mutex<Vec<R>>,
        fail_appends: AtomicBool,
    }

    impl<R> Default for FakeStore<R> {
        fn default() -> Self {
            Self { records: Mutex::new(Vec::new()), fail_appends: AtomicBool::new(false) }
        }
    }

    impl<R: Clone> FakeStore<R> {
        async fn records(&self) -> Vec<R> {
            self.records.lock().await.clone()
        }
    }

    #[async_trait]
    impl<R> RecordStore<R> for FakeStore<R>
    where
        R: Clone + Send + Sync + 'static,
    {
        async fn append(&self, record: R) -> Result<R, StoreError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".to_owned()));
            }
            self.records.lock().await.push(record.clone());
            Ok(record)
        }

        async fn list_all(&self) -> Result<Vec<R>, StoreError> {
            Ok(self.records.lock().await.clone())
        }
    }

    struct ScriptedDialer {
        result: OriginateResult,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedDialer {
        fn answering(result: OriginateResult) -> Self {
            Self { result, calls: Mutex::new(Vec::new()) }
        }

        async fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl CallDialer for ScriptedDialer {
        async fn originate(&self, from: &str, to: &str) -> OriginateResult {
            self.calls.lock().await.push((from.to_owned(), to.to_owned()));
            self.result.clone()
        }
    }

    struct Harness {
        runtime: DialogueRuntime,
        reminders: Arc<FakeStore<Reminder>>,
        appointments: Arc<FakeStore<Appointment>>,
        dialer: Arc<ScriptedDialer>,
        hub: RealtimeHub,
    }

    fn harness_with(dialer: ScriptedDialer, ttl: Duration) -> Harness {
        let reminders = Arc::new(FakeStore::<Reminder>::default());
        let appointments = Arc::new(FakeStore::<Appointment>::default());
        let dialer = Arc::new(dialer);
        let hub = RealtimeHub::new(16);
        let runtime = DialogueRuntime::new(
            DialogueEngine::default(),
            DialogueServices {
                reminders: reminders.clone(),
                appointments: appointments.clone(),
                dialer: dialer.clone(),
                hub: hub.clone(),
            },
            ttl,
        );
        Harness { runtime, reminders, appointments, dialer, hub }
    }

    fn harness() -> Harness {
        harness_with(
            ScriptedDialer::answering(OriginateResult::Accepted { action_id: "sb-1".to_owned() }),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn missing_session_id_is_minted_and_reused() {
        let h = harness();
        let first = h.runtime.handle_message(None, "rappel").await;
        assert!(!first.session_id.is_empty());
        assert_eq!(first.action, DialogueAction::CallbackRequest);

        let second = h.runtime.handle_message(Some(&first.session_id), "0612345678").await;
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.action, DialogueAction::Done);
    }

    #[tokio::test]
    async fn callback_flow_persists_one_reminder_and_publishes_the_list() {
        let h = harness();
        let mut updates = h.hub.subscribe();

        h.runtime.handle_message(Some("visitor-1"), "Je souhaite un rappel").await;
        let reply = h.runtime.handle_message(Some("visitor-1"), "0612345678").await;

        assert_eq!(reply.action, DialogueAction::Done);
        let reminders = h.reminders.records().await;
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].number, "0612345678");

        let state = h.runtime.state_of("visitor-1").await.expect("session");
        assert!(state.is_idle());

        let envelope = updates.next().await.expect("update");
        assert_eq!(envelope.event, "rappelsClientUpdate");
        assert_eq!(envelope.payload[0]["numero"], "0612345678");
    }

    #[tokio::test]
    async fn invalid_number_keeps_collecting_without_records() {
        let h = harness();
        h.runtime.handle_message(Some("visitor-2"), "rappel").await;
        let reply = h.runtime.handle_message(Some("visitor-2"), "12345").await;

        assert_eq!(reply.reply, replies::CALLBACK_RETRY);
        assert_eq!(reply.action, DialogueAction::CallbackRequest);
        assert!(h.reminders.records().await.is_empty());
        let state = h.runtime.state_of("visitor-2").await.expect("session");
        assert_eq!(state.active_flow, ActiveFlow::CallbackCollection);
        assert!(state.collected_fields.is_empty());
    }

    #[tokio::test]
    async fn appointment_flow_stores_exactly_one_record() {
        let h = harness();
        h.runtime.handle_message(Some("visitor-3"), "rendez-vous").await;
        let rejected = h
            .runtime
            .handle_message(Some("visitor-3"), "Jean Dupont, 29/07/2025, 10:30, 0612345678")
            .await;
        assert_eq!(rejected.action, DialogueAction::TechnicianAppointment);
        assert!(h.appointments.records().await.is_empty());

        let accepted = h
            .runtime
            .handle_message(
                Some("visitor-3"),
                "Jean Dupont, 29/07/2025, 10:30, 0612345678, Installation Fibre",
            )
            .await;
        assert_eq!(accepted.action, DialogueAction::Done);

        let appointments = h.appointments.records().await;
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].name, "Jean Dupont");
        assert_eq!(appointments[0].purpose, "Installation Fibre");
    }

    #[tokio::test]
    async fn store_failure_keeps_the_flow_open() {
        let h = harness();
        h.reminders.fail_appends.store(true, Ordering::SeqCst);

        h.runtime.handle_message(Some("visitor-4"), "rappel").await;
        let reply = h.runtime.handle_message(Some("visitor-4"), "0612345678").await;

        assert_eq!(reply.reply, replies::SAVE_FAILED);
        assert_eq!(reply.action, DialogueAction::CallbackRequest);
        let state = h.runtime.state_of("visitor-4").await.expect("session");
        assert_eq!(state.active_flow, ActiveFlow::CallbackCollection);
        assert!(state.collected_fields.is_empty());

        h.reminders.fail_appends.store(false, Ordering::SeqCst);
        let retry = h.runtime.handle_message(Some("visitor-4"), "0612345678").await;
        assert_eq!(retry.action, DialogueAction::Done);
        assert_eq!(h.reminders.records().await.len(), 1);
    }

    #[tokio::test]
    async fn accepted_offer_dials_once_with_the_fixed_pair() {
        let h = harness();
        h.runtime.handle_message(Some("visitor-5"), "une offre").await;
        let reply = h.runtime.handle_message(Some("visitor-5"), "oui").await;

        assert_eq!(reply.reply, replies::ADVISOR_CALLING);
        assert_eq!(reply.action, DialogueAction::Done);
        assert_eq!(h.dialer.calls().await, vec![("1001".to_owned(), "1002".to_owned())]);

        // A later "oui" outside the offer flow must not dial again.
        h.runtime.handle_message(Some("visitor-5"), "oui").await;
        assert_eq!(h.dialer.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn declined_offer_never_dials() {
        let h = harness();
        h.runtime.handle_message(Some("visitor-6"), "souscrire").await;
        let reply = h.runtime.handle_message(Some("visitor-6"), "non").await;

        assert_eq!(reply.reply, replies::FAREWELL);
        assert!(h.dialer.calls().await.is_empty());
    }

    #[tokio::test]
    async fn failed_origination_apologizes_and_resets() {
        let h = harness_with(
            ScriptedDialer::answering(OriginateResult::Rejected(
                RejectReason::ConnectionUnavailable,
            )),
            Duration::from_secs(60),
        );
        h.runtime.handle_message(Some("visitor-7"), "offre").await;
        let reply = h.runtime.handle_message(Some("visitor-7"), "oui").await;

        assert_eq!(reply.reply, replies::ADVISOR_UNREACHABLE);
        assert_eq!(reply.action, DialogueAction::Done);
        assert_eq!(h.dialer.calls().await.len(), 1);
        assert!(h.runtime.state_of("visitor-7").await.expect("session").is_idle());
    }

    #[tokio::test]
    async fn sessions_do_not_share_state() {
        let h = harness();
        h.runtime.handle_message(Some("a"), "rappel").await;
        let other = h.runtime.handle_message(Some("b"), "0612345678").await;

        assert_eq!(other.reply, replies::NOT_UNDERSTOOD);
        assert!(h.reminders.records().await.is_empty());
        assert_eq!(h.runtime.session_count().await, 2);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_after_the_ttl() {
        let h = harness_with(
            ScriptedDialer::answering(OriginateResult::TimedOut),
            Duration::from_millis(20),
        );
        h.runtime.handle_message(Some("stale"), "rappel").await;
        assert_eq!(h.runtime.evict_inactive().await, 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(h.runtime.evict_inactive().await, 1);
        assert!(h.runtime.state_of("stale").await.is_none());
    }

    #[tokio::test]
    async fn a_looked_up_session_survives_an_eviction_sweep() {
        let h = harness_with(
            ScriptedDialer::answering(OriginateResult::TimedOut),
            Duration::from_millis(20),
        );
        h.runtime.handle_message(Some("returning"), "rappel").await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // A turn has resolved its session but not yet taken the state lock.
        let session = h.runtime.session("returning").await;
        assert_eq!(h.runtime.evict_inactive().await, 0);

        let live = h.runtime.sessions.read().await.get("returning").cloned().expect("still mapped");
        assert!(Arc::ptr_eq(&session, &live));

        let reply = h.runtime.handle_message(Some("returning"), "0612345678").await;
        assert_eq!(reply.action, DialogueAction::Done);
        assert_eq!(h.reminders.records().await.len(), 1);
    }

    #[tokio::test]
    async fn opening_past_the_cap_drops_the_oldest_session() {
        let mut h = harness();
        h.runtime = h.runtime.with_max_sessions(2);

        h.runtime.handle_message(Some("first"), "rappel").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.runtime.handle_message(Some("second"), "rappel").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.runtime.handle_message(Some("first"), "bonjour").await;
        h.runtime.handle_message(None, "bonjour").await;

        assert_eq!(h.runtime.session_count().await, 2);
        assert!(h.runtime.state_of("first").await.is_some());
        assert!(h.runtime.state_of("second").await.is_none());
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use switchboard_core::config::DialogueConfig;
use switchboard_core::domain::records::is_phone_number;
use switchboard_core::{Appointment, DomainError, Reminder};
use thiserror::Error;

use crate::rules::{replies, DialogueAction, DialogueRule, RuleSet};

const AFFIRMATIVE: &[&str] = &["oui", "yes", "ok", "d'accord", "ouais", "offerconfirmation_yes"];
const NEGATIVE: &[&str] = &["non", "no", "offerconfirmation_no"];
const CANCEL: &[&str] = &["annuler", "stop"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActiveFlow {
    #[default]
    None,
    CallbackCollection,
    AppointmentCollection,
    OfferConfirmation,
}

impl ActiveFlow {
    /// Action echoed while the flow is still waiting for its input.
    pub fn pending_action(&self) -> DialogueAction {
        match self {
            Self::None => DialogueAction::None,
            Self::CallbackCollection => DialogueAction::CallbackRequest,
            Self::AppointmentCollection => DialogueAction::TechnicianAppointment,
            Self::OfferConfirmation => DialogueAction::OfferConfirmation,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub active_flow: ActiveFlow,
    pub collected_fields: BTreeMap<String, String>,
}

impl ConversationState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn in_flow(flow: ActiveFlow) -> Self {
        Self { active_flow: flow, collected_fields: BTreeMap::new() }
    }

    pub fn is_idle(&self) -> bool {
        self.active_flow == ActiveFlow::None
    }
}

/// Side effect a turn needs before its new state may be committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowEffect {
    PersistReminder(Reminder),
    PersistAppointment(Appointment),
    OriginateCall { from: String, to: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogueTurn {
    pub reply: String,
    pub action: DialogueAction,
    pub next_state: ConversationState,
    pub effect: Option<FlowEffect>,
    /// Fields of the record completed by this turn, all or nothing.
    pub collected_fields: BTreeMap<String, String>,
}

impl DialogueTurn {
    fn reply(reply: impl Into<String>, action: DialogueAction, next_state: ConversationState) -> Self {
        Self {
            reply: reply.into(),
            action,
            next_state,
            effect: None,
            collected_fields: BTreeMap::new(),
        }
    }

    fn with_effect(mut self, effect: FlowEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.collected_fields = fields;
        self
    }
}

/// Extensions bridged when a visitor accepts the advisor offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionPair {
    pub from: String,
    pub to: String,
}

impl Default for ExtensionPair {
    fn default() -> Self {
        Self { from: "1001".to_owned(), to: "1002".to_owned() }
    }
}

impl ExtensionPair {
    pub fn from_config(config: &DialogueConfig) -> Self {
        Self { from: config.offer_from_extension.clone(), to: config.offer_to_extension.clone() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("expected a 10-digit phone number")]
    NotAPhoneNumber,
    #[error("expected 5 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error(transparent)]
    Field(#[from] DomainError),
}

enum OfferAnswer {
    Accept,
    Decline,
}

/// Pure transition function of the dialogue: current state and message in,
/// reply, next state and the side effect to run out.
#[derive(Clone, Debug, Default)]
pub struct DialogueEngine {
    rules: RuleSet,
    offer_pair: ExtensionPair,
}

impl DialogueEngine {
    pub fn new(rules: RuleSet, offer_pair: ExtensionPair) -> Self {
        Self { rules, offer_pair }
    }

    pub fn offer_pair(&self) -> &ExtensionPair {
        &self.offer_pair
    }

    pub fn apply(&self, state: &ConversationState, message: &str) -> DialogueTurn {
        let lowercased = message.to_lowercase();
        match state.active_flow {
            ActiveFlow::None => self.idle_turn(&lowercased),
            ActiveFlow::CallbackCollection => match parse_callback_number(message) {
                Ok(reminder) => {
                    let fields = BTreeMap::from([("numero".to_owned(), reminder.number.clone())]);
                    let reply = format!(
                        "Merci ! Votre demande de rappel au {} est enregistrée. Un conseiller vous rappellera sous peu.",
                        reminder.number
                    );
                    DialogueTurn::reply(reply, DialogueAction::Done, ConversationState::idle())
                        .with_effect(FlowEffect::PersistReminder(reminder))
                        .with_fields(fields)
                }
                Err(_) => self.off_script(state, &lowercased, replies::CALLBACK_RETRY),
            },
            ActiveFlow::AppointmentCollection => match parse_appointment(message) {
                Ok(appointment) => {
                    let fields = appointment_fields(&appointment);
                    let reply = format!(
                        "Merci {} ! Votre rendez-vous du {} à {} est enregistré. Un technicien vous contactera au {}.",
                        appointment.name, appointment.date, appointment.time, appointment.mobile
                    );
                    DialogueTurn::reply(reply, DialogueAction::Done, ConversationState::idle())
                        .with_effect(FlowEffect::PersistAppointment(appointment))
                        .with_fields(fields)
                }
                Err(_) => self.off_script(state, &lowercased, replies::APPOINTMENT_RETRY),
            },
            ActiveFlow::OfferConfirmation => match offer_answer(&lowercased) {
                Some(OfferAnswer::Accept) => DialogueTurn::reply(
                    replies::ADVISOR_CALLING,
                    DialogueAction::Done,
                    ConversationState::idle(),
                )
                .with_effect(FlowEffect::OriginateCall {
                    from: self.offer_pair.from.clone(),
                    to: self.offer_pair.to.clone(),
                }),
                Some(OfferAnswer::Decline) => DialogueTurn::reply(
                    replies::FAREWELL,
                    DialogueAction::Done,
                    ConversationState::idle(),
                ),
                None => self.off_script(state, &lowercased, replies::OFFER_RETRY),
            },
        }
    }

    fn idle_turn(&self, lowercased: &str) -> DialogueTurn {
        let rule = self.rules.evaluate(lowercased);
        rule_turn(rule)
    }

    /// Input that does not fit the active flow: either the visitor moved on
    /// (a keyword or a cancel word abandons the flow) or we ask again.
    fn off_script(&self, state: &ConversationState, lowercased: &str, retry: &str) -> DialogueTurn {
        if is_cancel(lowercased) {
            return DialogueTurn::reply(
                replies::CANCELLED,
                DialogueAction::None,
                ConversationState::idle(),
            );
        }
        if let Some(rule) = self.rules.keyword_match(lowercased) {
            return rule_turn(rule);
        }
        DialogueTurn::reply(
            retry,
            state.active_flow.pending_action(),
            ConversationState::in_flow(state.active_flow),
        )
    }
}

fn rule_turn(rule: &DialogueRule) -> DialogueTurn {
    DialogueTurn::reply(rule.reply, rule.action, ConversationState::in_flow(rule.enters))
}

/// Accepts ten digits, optionally grouped with spaces, dots or hyphens.
pub fn parse_callback_number(message: &str) -> Result<Reminder, InputError> {
    let compact: String =
        message.trim().chars().filter(|ch| !matches!(ch, ' ' | '.' | '-')).collect();
    if !is_phone_number(&compact) {
        return Err(InputError::NotAPhoneNumber);
    }
    Ok(Reminder::new(&compact)?)
}

/// `name, DD/MM/YYYY, HH:MM, mobile, purpose`; only the first four commas
/// split, so the purpose may contain commas of its own.
pub fn parse_appointment(message: &str) -> Result<Appointment, InputError> {
    let fields: Vec<&str> = message.trim().splitn(5, ',').collect();
    if fields.len() != 5 {
        return Err(InputError::FieldCount(fields.len()));
    }
    Ok(Appointment::new(fields[0], fields[1], fields[2], fields[3], fields[4])?)
}

fn appointment_fields(appointment: &Appointment) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("nom".to_owned(), appointment.name.clone()),
        ("date".to_owned(), appointment.date.clone()),
        ("heure".to_owned(), appointment.time.clone()),
        ("numero_mobile".to_owned(), appointment.mobile.clone()),
        ("objet_demande".to_owned(), appointment.purpose.clone()),
    ])
}

fn first_word(lowercased: &str) -> String {
    lowercased
        .replace('’', "'")
        .split(|ch: char| ch.is_whitespace() || matches!(ch, ',' | '.' | '!' | '?' | ';' | ':'))
        .find(|word| !word.is_empty())
        .unwrap_or_default()
        .to_owned()
}

fn offer_answer(lowercased: &str) -> Option<OfferAnswer> {
    let word = first_word(lowercased);
    if AFFIRMATIVE.contains(&word.as_str()) {
        Some(OfferAnswer::Accept)
    } else if NEGATIVE.contains(&word.as_str()) {
        Some(OfferAnswer::Decline)
    } else {
        None
    }
}

fn is_cancel(lowercased: &str) -> bool {
    CANCEL.contains(&first_word(lowercased).as_str())
}

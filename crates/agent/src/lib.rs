//! Dialogue runtime for the website chat widget.
//!
//! The assistant is a deterministic keyword/flow engine, not a language model:
//! - `rules` holds the ordered keyword rules and the French replies
//! - `conversation` is the pure per-turn state machine (`DialogueEngine::apply`)
//! - `runtime` owns the per-session state and executes side effects
//!   (saving reminders and appointments, calling an advisor)
//!
//! A turn's new state is only committed once its side effect has succeeded.

pub mod conversation;
pub mod rules;
pub mod runtime;

pub use conversation::{
    ActiveFlow, ConversationState, DialogueEngine, DialogueTurn, ExtensionPair, FlowEffect,
    InputError,
};
pub use rules::{DialogueAction, DialogueRule, RuleSet};
pub use runtime::{DialogueRuntime, DialogueServices, TurnReply, DEFAULT_SESSION_TTL};

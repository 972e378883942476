//! Switchboard core - shared contracts for the contact hub
//!
//! Everything here is transport-agnostic:
//! - **Configuration** (`config`) - layered TOML/env loading with validation
//! - **Errors** (`errors`) - domain/application/interface error taxonomy
//! - **Domain** (`domain`) - calls, origination outcomes, persisted records
//! - **Record stores** (`store`) - the append/list persistence contract
//! - **Realtime** (`realtime`) - bounded fan-out hub for connected clients

pub mod config;
pub mod domain;
pub mod errors;
pub mod realtime;
pub mod store;

pub use domain::call::{
    CallDialer, InboundCallEvent, OriginateRequest, OriginateResult, RejectReason,
};
pub use domain::records::{Appointment, GeneralMessage, PrivateMessage, Reminder};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use realtime::{RealtimeEnvelope, RealtimeEvent, RealtimeHub, RealtimeSubscription};
pub use store::{PrivateMessageStore, RecordStore, StoreError};

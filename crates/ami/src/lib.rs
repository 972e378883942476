//! Asterisk Manager Interface (AMI) client
//!
//! This crate owns the single control-plane connection to the PBX:
//! - **Frames** (`frame`) - `Key: Value` line codec, banner handling
//! - **Actions** (`action`) - `Login`, `Originate`, `Ping` and their responses
//! - **Events** (`events`) - manager events and the inbound-call filter
//! - **Link** (`link`) - supervised, auto-reconnecting session with ActionID
//!   correlation and a restartable event subscription
//! - **Origination** (`originate`) - `CallOriginator`, the outbound-call dialer
//!
//! # Architecture
//!
//! ```text
//! TCP ─→ reader task ─→ supervisor ─┬─→ pending[ActionID] ─→ send_action caller
//!                                   └─→ broadcast<ManagerEvent> ─→ subscribers
//! send_action ─→ outbound queue ─→ writer ─→ TCP
//! ```

pub mod action;
pub mod events;
pub mod frame;
pub mod link;
pub mod originate;

pub use action::{ManagerAction, ManagerResponse};
pub use events::{EventSubscription, ManagerEvent, ManagerEventSource};
pub use frame::{FrameError, ManagerFrame};
pub use link::{
    ActionError, ActionSender, ConnectError, LinkState, ManagerConnector, ManagerLink,
    ManagerSettings, ReconnectPolicy, TcpConnector,
};
pub use originate::{CallOriginator, OriginateSettings};

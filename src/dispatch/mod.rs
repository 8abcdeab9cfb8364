//! Priority and link-status driven dispatch control.
//!
//! The rule parser turns a `<msgDispatch>` document into a resolved
//! status table; the engine consults that table together with the link
//! state of each target to deliver, hold back, destroy or report every
//! outgoing message.

pub mod action;
pub mod backlog;
pub mod engine;
pub mod link;
pub mod notify;
pub mod parser;
pub mod priority;
pub mod reconfig;
pub mod table;

pub use action::ActionSet;
pub use engine::{DispatchEngine, DispatchOutcome, DispatchReport, EngineSettings, FlushReport, Transport};
pub use priority::Priority;
pub use table::{ConnectionState, StatusConfigurationTable};

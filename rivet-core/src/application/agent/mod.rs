//! # Agent Module
//!
//! Drives one user request through a bounded loop: stream a model turn,
//! parse it into text and tool invocations, run the tools in order, feed the
//! results back, repeat.
//!
//! ## Key Types
//!
//! - [`TaskOrchestrator`] - the loop for one task
//! - [`TaskControl`] - cancellation, state and permission answers for the host
//! - [`AgentEvent`] - everything a task reports while it runs
//! - [`RecoveryPolicy`] - retry, surface or terminate on failure
//!
//! ## Loop
//!
//! 1. Stop if cancelled; finish with a notice once the iteration cap is hit
//! 2. Stream one model turn (one retry on transport failure)
//! 3. Text without tools earns a corrective instruction; nothing at all ends the task
//! 4. Tools run sequentially; the completion tool ends the task after its batch

mod errors;
mod events;
mod instructions;
mod models;
mod permission;
mod recovery;
mod runner;

pub use errors::AgentError;
pub use events::AgentEvent;
pub use instructions::compose_system_prompt;
pub use models::{AgentOptions, TaskOutcome, TaskState};
pub use permission::{PermissionDecision, PermissionGate};
pub use recovery::{FailureKind, RecoveryAction, RecoveryPolicy};
pub use runner::{TaskControl, TaskOrchestrator};

#[cfg(test)]
mod tests;

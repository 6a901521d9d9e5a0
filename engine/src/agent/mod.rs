//! Step Engine
//!
//! Turns a goal into a sequence of steps. The orchestrator seeds a per-task
//! chat context with instructions, a persona and a plan; each step asks the
//! model for its next move and dispatches the abilities it requests.

pub mod chat_context;
pub mod core;
pub mod executor;
pub mod persona;
pub mod planner;
pub mod reply;

pub use chat_context::{ChatContext, ChatContextManager};
pub use core::Agent;
pub use executor::{StepExecutor, StepSettings, STEP_ABILITIES_KEY};
pub use persona::{Persona, PersonaGenerator};
pub use planner::Planner;
pub use reply::{AbilityCall, AgentReply, ReplyError, Thoughts, DEFAULT_SPEAK};

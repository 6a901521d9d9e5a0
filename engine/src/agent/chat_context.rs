//! Per-task conversation state
//!
//! Every task owns one [`ChatContext`]: the ordered messages sent to the
//! model, the seed instructions, the step counter and the persona. Contexts
//! live in a process-wide map behind per-task locks, so steps of one task run
//! one at a time while unrelated tasks proceed in parallel.

use chrono::Local;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::persona::Persona;
use crate::llm::{Message, MessageRole};

const LOOP_NOTICE: &str = "You have gone off course and repeating the same step. Remember the instructions you are supposed to be working through and move on";

/// Conversation state of one task
#[derive(Debug, Default)]
pub struct ChatContext {
    messages: Vec<Message>,
    instructions: Vec<Message>,
    step_count: u32,
    persona: Option<Persona>,
}

impl ChatContext {
    /// Messages in the order they are sent to the model
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True once the seed instructions are in place
    pub fn is_seeded(&self) -> bool {
        !self.instructions.is_empty()
    }

    /// Append a message, replacing exact repeats with a loop nudge.
    ///
    /// Returns false when the message was a repeat and the nudge was appended
    /// instead.
    pub fn append(&mut self, message: Message) -> bool {
        if self.messages.contains(&message) {
            warn!(
                role = %message.role,
                "Repeated message detected, appending loop nudge"
            );
            let nudge = self.loop_nudge();
            self.messages.push(nudge);
            return false;
        }

        self.messages.push(message);
        true
    }

    /// Append a seed instruction and remember it for loop nudges
    pub fn add_instruction(&mut self, message: Message) {
        self.instructions.push(message.clone());
        self.append(message);
    }

    /// Most recent seed instruction
    pub fn current_instruction(&self) -> Option<&Message> {
        self.instructions.last()
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    /// Increment the step counter and return the new value
    pub fn next_step(&mut self) -> u32 {
        self.step_count += 1;
        self.step_count
    }

    pub fn persona(&self) -> Option<&Persona> {
        self.persona.as_ref()
    }

    pub fn set_persona(&mut self, persona: Persona) {
        self.persona = Some(persona);
    }

    fn loop_nudge(&self) -> Message {
        let timestamp = Local::now().format("%m/%d/%Y %H:%M:%S");
        let content = match self.current_instruction() {
            Some(instruction) => format!(
                "[{}] {}\n\n{}",
                timestamp, LOOP_NOTICE, instruction.content
            ),
            None => format!("[{}] {}", timestamp, LOOP_NOTICE),
        };
        Message::new(MessageRole::User, content)
    }
}

/// Process-wide map of task contexts
#[derive(Default)]
pub struct ChatContextManager {
    contexts: Mutex<HashMap<String, Arc<Mutex<ChatContext>>>>,
}

impl ChatContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, task_id: &str) -> Arc<Mutex<ChatContext>> {
        let mut contexts = self.contexts.lock().await;
        let entry = contexts.entry(task_id.to_string()).or_insert_with(|| {
            debug!(task_id, "Creating chat context");
            Arc::new(Mutex::new(ChatContext::default()))
        });
        Arc::clone(entry)
    }

    /// Lock a task's context, creating it on first use.
    ///
    /// The guard is held for a whole step, which serializes steps per task.
    pub async fn lock(&self, task_id: &str) -> OwnedMutexGuard<ChatContext> {
        self.entry(task_id).await.lock_owned().await
    }

    /// Append one message to a task's context
    pub async fn append(&self, task_id: &str, message: Message) -> bool {
        self.lock(task_id).await.append(message)
    }

    /// Copy of a task's conversation, empty if the task has none
    pub async fn export(&self, task_id: &str) -> Vec<Message> {
        let entry = self.contexts.lock().await.get(task_id).map(Arc::clone);
        match entry {
            Some(context) => context.lock().await.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.contexts.lock().await.contains_key(task_id)
    }

    /// Number of tasks with a context
    pub async fn task_count(&self) -> usize {
        self.contexts.lock().await.len()
    }
}

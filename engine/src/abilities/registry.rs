//! Ability registry
//!
//! Built once at startup from an explicit registration table and read-only
//! afterwards, so it can be shared across tasks without locking.

use futures::FutureExt;
use sdk::ability::{Ability, AbilityContext};
use sdk::errors::{EngineError, ForgeErrorExt};
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput, TASK_ID_ARG};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Registry of abilities the model can dispatch by name
pub struct AbilityRegistry {
    abilities: HashMap<String, Arc<dyn Ability>>,
    order: Vec<String>,
    timeout: Duration,
}

impl AbilityRegistry {
    /// Create an empty registry
    pub fn new(timeout: Duration) -> Self {
        Self {
            abilities: HashMap::new(),
            order: Vec::new(),
            timeout,
        }
    }

    /// Register an ability
    ///
    /// The names `execute` accepts must equal the declared parameters plus
    /// `task_id`. On mismatch the ability is skipped and the error returned;
    /// the registry is left unchanged. Registering a name twice replaces the
    /// earlier ability.
    pub fn register(&mut self, ability: Arc<dyn Ability>) -> Result<(), EngineError> {
        let descriptor = ability.descriptor();
        let name = descriptor.name.clone();

        if let Err(reason) = check_contract(&descriptor, ability.arguments()) {
            error!("Skipping ability '{}': {}", name, reason);
            return Err(EngineError::AbilityRegistration { name, reason });
        }

        if self.abilities.insert(name.clone(), ability).is_some() {
            warn!("Ability '{}' registered twice; the later one wins", name);
        } else {
            self.order.push(name.clone());
        }

        debug!("Registered ability '{}' ({})", name, descriptor.category);
        Ok(())
    }

    /// Register a batch, logging and skipping the ones that fail validation
    pub fn register_all(&mut self, abilities: Vec<Arc<dyn Ability>>) -> usize {
        let mut registered = 0;
        for ability in abilities {
            if self.register(ability).is_ok() {
                registered += 1;
            }
        }
        info!("{} abilities registered", self.order.len());
        registered
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.abilities.contains_key(name)
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> Vec<AbilityDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.abilities.get(name))
            .map(|a| a.descriptor())
            .collect()
    }

    /// Descriptors grouped by category
    pub fn describe_all(&self) -> BTreeMap<String, Vec<AbilityDescriptor>> {
        let mut grouped: BTreeMap<String, Vec<AbilityDescriptor>> = BTreeMap::new();
        for descriptor in self.descriptors() {
            grouped
                .entry(descriptor.category.clone())
                .or_default()
                .push(descriptor);
        }
        grouped
    }

    /// One catalog line per ability, in registration order
    pub fn list_for_prompt(&self) -> Vec<String> {
        self.descriptors().iter().map(ToString::to_string).collect()
    }

    /// Catalog text grouped under category headings
    pub fn abilities_description(&self) -> String {
        self.describe_all()
            .iter()
            .map(|(category, descriptors)| {
                let lines = descriptors
                    .iter()
                    .map(|d| format!("  {}", d))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("{}:\n{}", category, lines)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Dispatch an ability by name
    ///
    /// Argument names are checked against the descriptor, then the ability
    /// runs under the registry timeout. Recoverable failures, timeouts and
    /// panics come back as [`EngineError::AbilityExecution`]; fatal errors
    /// such as a store failure pass through unchanged. An unregistered name
    /// is [`EngineError::UnknownAbility`].
    pub async fn dispatch(
        &self,
        ctx: &AbilityContext,
        task_id: &str,
        name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<AbilityOutput, EngineError> {
        let ability = self
            .abilities
            .get(name)
            .ok_or_else(|| EngineError::UnknownAbility(name.to_string()))?;

        let descriptor = ability.descriptor();
        let params = args.unwrap_or_default();
        check_arguments(&descriptor, &params).map_err(|reason| EngineError::execution(name, reason))?;

        debug!(task_id, ability = name, "Dispatching ability");

        let call = AssertUnwindSafe(ability.execute(ctx, AbilityArgs::from_map(task_id, params)))
            .catch_unwind();

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e @ EngineError::AbilityExecution { .. }))) => Err(e),
            Ok(Ok(Err(e))) if !e.is_recoverable() => {
                error!(ability = name, "Ability hit a fatal error: {}", e);
                Err(e)
            }
            Ok(Ok(Err(e))) => Err(EngineError::execution(name, e.to_string())),
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(ability = name, "Ability panicked: {}", message);
                Err(EngineError::execution(name, format!("panicked: {}", message)))
            }
            Err(_) => Err(EngineError::execution(
                name,
                EngineError::Timeout(self.timeout.as_secs()).to_string(),
            )),
        }
    }
}

fn check_contract(descriptor: &AbilityDescriptor, accepted: &[&str]) -> Result<(), String> {
    let mut declared = BTreeSet::new();
    for param in &descriptor.parameters {
        if param.name == TASK_ID_ARG {
            return Err(format!("'{}' is implicit and cannot be declared", TASK_ID_ARG));
        }
        if !declared.insert(param.name.as_str()) {
            return Err(format!("parameter '{}' declared twice", param.name));
        }
    }
    declared.insert(TASK_ID_ARG);

    let accepted: BTreeSet<&str> = accepted.iter().copied().collect();
    if declared != accepted {
        let missing: Vec<_> = declared.difference(&accepted).collect();
        let extra: Vec<_> = accepted.difference(&declared).collect();
        return Err(format!(
            "declared parameters do not match accepted arguments (not accepted: {:?}, undeclared: {:?})",
            missing, extra
        ));
    }
    Ok(())
}

fn check_arguments(descriptor: &AbilityDescriptor, args: &Map<String, Value>) -> Result<(), String> {
    if let Some(unknown) = args.keys().find(|k| descriptor.parameter(k).is_none()) {
        return Err(format!("unexpected argument '{}'", unknown));
    }
    if let Some(missing) = descriptor
        .parameters
        .iter()
        .find(|p| p.required && args.get(&p.name).map_or(true, Value::is_null))
    {
        return Err(format!("missing required argument '{}'", missing.name));
    }
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

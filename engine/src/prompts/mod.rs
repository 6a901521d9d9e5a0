//! Prompt templates
//!
//! Templates are embedded at compile time and rendered with minijinja. Missing
//! substitutions are errors rather than empty strings.

use minijinja::{Environment, UndefinedBehavior};
use sdk::errors::EngineError;
use serde_json::Value;

/// Response-format instructions
pub const SYSTEM_FORMAT: &str = "system-format";
/// Ability catalog list; takes `abilities`
pub const ABILITIES_LIST: &str = "abilities-list";
/// Persona request; takes `task`
pub const ROLE_SELECTION: &str = "role-selection";
/// Persona statement; takes `name`, `expertise`
pub const ROLE_STATEMENT: &str = "role-statement";
/// Plan request; takes `task`
pub const GET_STEPS: &str = "get-steps";
/// Work instruction; takes `plan`, `task`
pub const STEP_WORK: &str = "step-work";

const TEMPLATES: &[(&str, &str)] = &[
    (SYSTEM_FORMAT, include_str!("../../prompts/system-format.j2")),
    (ABILITIES_LIST, include_str!("../../prompts/abilities-list.j2")),
    (ROLE_SELECTION, include_str!("../../prompts/role-selection.j2")),
    (ROLE_STATEMENT, include_str!("../../prompts/role-statement.j2")),
    (GET_STEPS, include_str!("../../prompts/get-steps.j2")),
    (STEP_WORK, include_str!("../../prompts/step-work.j2")),
];

/// Source of rendered prompt text
pub trait PromptTemplateSource: Send + Sync {
    /// Render `template` with the substitutions in `vars` (a JSON object)
    fn load(&self, template: &str, vars: &Value) -> Result<String, EngineError>;
}

/// Embedded minijinja templates
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self, EngineError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        for &(name, source) in TEMPLATES {
            env.add_template(name, source)
                .map_err(|e| EngineError::Template(format!("{}: {}", name, e)))?;
        }

        Ok(Self { env })
    }

    /// Names of the available templates
    pub fn template_names(&self) -> Vec<&'static str> {
        TEMPLATES.iter().map(|(name, _)| *name).collect()
    }
}

impl PromptTemplateSource for PromptEngine {
    fn load(&self, template: &str, vars: &Value) -> Result<String, EngineError> {
        let tmpl = self
            .env
            .get_template(template)
            .map_err(|e| EngineError::Template(format!("{}: {}", template, e)))?;

        tmpl.render(vars)
            .map_err(|e| EngineError::Template(format!("{}: {}", template, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_templates_compile() {
        let engine = PromptEngine::new().unwrap();
        assert_eq!(engine.template_names().len(), 6);
    }

    #[test]
    fn test_system_format_has_schema() {
        let engine = PromptEngine::new().unwrap();
        let text = engine.load(SYSTEM_FORMAT, &json!({})).unwrap();
        assert!(text.contains("\"thoughts\""));
        assert!(text.contains("\"speak\""));
        assert!(text.contains("\"abilities\""));
    }

    #[test]
    fn test_abilities_list_renders_each_line() {
        let engine = PromptEngine::new().unwrap();
        let text = engine
            .load(
                ABILITIES_LIST,
                &json!({"abilities": ["a() -> str. Usage: x,", "b() -> str. Usage: y,"]}),
            )
            .unwrap();
        assert!(text.contains("- a() -> str. Usage: x,"));
        assert!(text.contains("- b() -> str. Usage: y,"));
    }

    #[test]
    fn test_step_work_substitutions() {
        let engine = PromptEngine::new().unwrap();
        let text = engine
            .load(STEP_WORK, &json!({"plan": "1. write", "task": "Write hello"}))
            .unwrap();
        assert!(text.contains("1. write"));
        assert!(text.contains("Task: Write hello"));
    }

    #[test]
    fn test_missing_substitution_is_error() {
        let engine = PromptEngine::new().unwrap();
        let err = engine.load(ROLE_STATEMENT, &json!({"name": "Ada"})).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_unknown_template_is_error() {
        let engine = PromptEngine::new().unwrap();
        assert!(matches!(
            engine.load("nope", &json!({})),
            Err(EngineError::Template(_))
        ));
    }
}

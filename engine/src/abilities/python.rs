//! Python script execution

use async_trait::async_trait;
use sdk::ability::{Ability, AbilityContext};
use sdk::errors::EngineError;
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput, AbilityParameter};
use tracing::info;

pub struct RunPythonFile;

#[async_trait]
impl Ability for RunPythonFile {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new(
            "run_python_file",
            "Run a Python file in the task workspace and return its exit code and output",
            "json",
        )
        .with_parameter(AbilityParameter::required(
            "file_name",
            "string",
            "Path to the Python file, relative to the task workspace",
        ))
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id", "file_name"]
    }

    async fn execute(
        &self,
        ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        let file_name = args.param_str("file_name")?;
        let script = ctx.workspace.resolve(&args.task_id, &file_name).await?;
        let is_file = tokio::fs::metadata(&script)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(EngineError::Workspace(format!("{}: no such file", file_name)));
        }
        let cwd = ctx.workspace.resolve(&args.task_id, ".").await?;

        let output = ctx.process.run_python(script, cwd).await?;
        info!("{} exited with {}", file_name, output.return_code);

        let value = serde_json::to_value(&output)
            .map_err(|e| EngineError::execution("run_python_file", e.to_string()))?;
        Ok(AbilityOutput::Json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abilities::test_support::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_script() {
        let (_dir, ctx) = test_context().await;
        let args = AbilityArgs::new("t").with_param("file_name", json!("nope.py"));
        assert!(matches!(
            RunPythonFile.execute(&ctx, args).await,
            Err(EngineError::Workspace(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_escape() {
        let (_dir, ctx) = test_context().await;
        let args = AbilityArgs::new("t").with_param("file_name", json!("../x.py"));
        assert!(matches!(
            RunPythonFile.execute(&ctx, args).await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
    }
}

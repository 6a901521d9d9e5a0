//! Workspace file abilities
//!
//! All paths are relative to the task directory and go through the
//! workspace handle, which rejects anything that would leave it.

use async_trait::async_trait;
use sdk::ability::{Ability, AbilityContext};
use sdk::errors::EngineError;
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput, AbilityParameter};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

use super::FILE_SYSTEM;

/// Undo the escaping models apply to file contents.
///
/// Doubled backslashes collapse first, then a literal `\n` becomes a newline.
fn unescape(data: &str) -> String {
    data.replace("\\\\", "\\").replace("\\n", "\n")
}

pub struct WriteFile;

#[async_trait]
impl Ability for WriteFile {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new("write_file", "Write data to a file", "None")
            .with_parameter(AbilityParameter::required(
                "file_name",
                "string",
                "Name of the file",
            ))
            .with_parameter(AbilityParameter::required(
                "data",
                "bytes",
                "Data to write to the file",
            ))
            .with_category(FILE_SYSTEM)
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id", "file_name", "data"]
    }

    async fn execute(
        &self,
        ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        let file_name = args.param_str("file_name")?;
        let data = unescape(&args.param_str("data")?);

        ctx.workspace
            .write(&args.task_id, &file_name, data.as_bytes())
            .await?;

        let short_name = Path::new(&file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());

        let artifact_id = ctx
            .artifacts
            .create(&args.task_id, ctx.step_id.as_deref(), &short_name, &file_name)
            .await?;

        info!("Wrote {} ({} bytes), artifact {}", file_name, data.len(), artifact_id);
        Ok(AbilityOutput::Empty)
    }
}

pub struct ReadFile;

#[async_trait]
impl Ability for ReadFile {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new("read_file", "Read data from a file", "bytes")
            .with_parameter(AbilityParameter::required(
                "file_path",
                "string",
                "Path to the file",
            ))
            .with_category(FILE_SYSTEM)
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id", "file_path"]
    }

    async fn execute(
        &self,
        ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        let file_path = args.param_str("file_path")?;
        let data = ctx.workspace.read(&args.task_id, &file_path).await?;
        debug!("Read {} bytes from {}", data.len(), file_path);
        Ok(AbilityOutput::Bytes(data))
    }
}

pub struct ListFiles;

#[async_trait]
impl Ability for ListFiles {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new(
            "list_files",
            "List files in a directory relative to the task workspace",
            "list[str]",
        )
        .with_parameter(AbilityParameter::required(
            "path",
            "string",
            "Path to the directory",
        ))
        .with_category(FILE_SYSTEM)
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id", "path"]
    }

    async fn execute(
        &self,
        ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        let path = args.param_str("path")?;
        let entries = ctx.workspace.list(&args.task_id, &path).await?;
        Ok(AbilityOutput::Json(Value::from(entries)))
    }
}

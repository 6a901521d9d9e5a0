use async_trait::async_trait;
use sdk::ability::{Ability, AbilityContext};
use sdk::errors::EngineError;
use sdk::types::{AbilityArgs, AbilityDescriptor, AbilityOutput, AbilityParameter};

/// Name of the ability that ends a task
pub const FINISH: &str = "finish";

pub struct Finish;

#[async_trait]
impl Ability for Finish {
    fn descriptor(&self) -> AbilityDescriptor {
        AbilityDescriptor::new(
            FINISH,
            "Use this to shut down once you have accomplished all of your goals, or when there are insurmountable problems that make it impossible for you to finish your task.",
            "None",
        )
        .with_parameter(AbilityParameter::required(
            "reason",
            "string",
            "A summary to the user of how the goals were accomplished",
        ))
    }

    fn arguments(&self) -> &'static [&'static str] {
        &["task_id", "reason"]
    }

    async fn execute(
        &self,
        _ctx: &AbilityContext,
        args: AbilityArgs,
    ) -> Result<AbilityOutput, EngineError> {
        Ok(AbilityOutput::Text(args.param_str("reason")?))
    }
}

//! Clock capability.

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};

use super::{Arguments, Capability, CapabilityOutcome, ParameterKind, ParameterSpec};

/// Report the current date and time.
pub struct CurrentTime;

#[async_trait]
impl Capability for CurrentTime {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Use for questions about today, deadlines or relative dates."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::optional(
            "utc_offset_hours",
            ParameterKind::Integer,
            "Offset from UTC in hours (-12 to 14)",
            Some(json!(0)),
        )]
    }

    async fn execute(&self, args: Arguments) -> anyhow::Result<CapabilityOutcome> {
        let hours = args
            .get("utc_offset_hours")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if !(-12..=14).contains(&hours) {
            return Err(anyhow::anyhow!("utc_offset_hours must be between -12 and 14"));
        }
        let offset = FixedOffset::east_opt((hours * 3600) as i32)
            .ok_or_else(|| anyhow::anyhow!("invalid UTC offset: {}", hours))?;
        let now = Utc::now().with_timezone(&offset);

        Ok(CapabilityOutcome::success(json!(now.format("%A %Y-%m-%d %H:%M:%S %:z").to_string()))
            .with_metadata("rfc3339", json!(now.to_rfc3339())))
    }
}

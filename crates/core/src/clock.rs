//! Built-in `get_current_time` tool.

use crate::tools::{ToolDeclaration, ToolError};
use chrono::{DateTime, FixedOffset, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

pub const CURRENT_TIME_TOOL: &str = "get_current_time";

/// Arguments for `get_current_time`.
#[derive(Deserialize, JsonSchema, Debug, Default)]
pub struct CurrentTimeArgs {
    /// Offset from UTC in minutes, e.g. -300 for UTC-5. Defaults to UTC.
    #[serde(default)]
    #[schemars(description = "Offset from UTC in minutes, e.g. -300 for UTC-5. Defaults to UTC.")]
    pub utc_offset_minutes: Option<i32>,
}

pub fn current_time_tool() -> ToolDeclaration {
    ToolDeclaration::typed(
        CURRENT_TIME_TOOL,
        "Get the current date and time, optionally shifted to a fixed UTC offset.",
        |session_id: String, args: CurrentTimeArgs| async move {
            info!(%session_id, ?args, "Executing tool 'get_current_time'");
            time_at_offset(Utc::now(), args.utc_offset_minutes.unwrap_or(0))
        },
    )
}

fn time_at_offset(now: DateTime<Utc>, offset_minutes: i32) -> Result<Value, ToolError> {
    let offset = offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            ToolError::InvalidParameters(format!(
                "utc_offset_minutes {offset_minutes} is outside ±24h"
            ))
        })?;
    Ok(json!({
        "time": now.with_timezone(&offset).to_rfc3339(),
        "utc_offset_minutes": offset_minutes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_at_offset_formats_rfc3339() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let value = time_at_offset(now, -300).unwrap();
        assert_eq!(value["time"], "2024-03-01T07:30:00-05:00");
        assert_eq!(value["utc_offset_minutes"], -300);
    }

    #[test]
    fn test_time_at_offset_rejects_out_of_range() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert!(matches!(
            time_at_offset(now, 24 * 60),
            Err(ToolError::InvalidParameters(_))
        ));
        assert!(time_at_offset(now, i32::MAX).is_err());
    }

    #[tokio::test]
    async fn test_tool_defaults_to_utc() {
        let tool = current_time_tool();
        assert_eq!(tool.spec.name, CURRENT_TIME_TOOL);
        let value = tool.handler.call("s1", json!({})).await.unwrap();
        assert_eq!(value["utc_offset_minutes"], 0);
        assert!(value["time"].as_str().unwrap().ends_with("+00:00"));
    }
}

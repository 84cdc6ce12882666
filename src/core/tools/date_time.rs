//! `getDateAndTimeTool`: current wall-clock time in Los Angeles.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};

use super::{ToolCallResult, ToolHandler, ToolSpec};

pub const DATE_AND_TIME_TOOL_NAME: &str = "getDateAndTimeTool";

/// The label is always "PST", daylight saving or not.
const TIMEZONE_LABEL: &str = "PST";

#[derive(Debug, Clone, Copy, Default)]
pub struct DateAndTimeTool;

#[async_trait]
impl ToolHandler for DateAndTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: DATE_AND_TIME_TOOL_NAME.to_string(),
            description: "get information about the current date and time".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    async fn invoke(&self, _arguments: Value) -> ToolCallResult<Value> {
        let now = Utc::now().with_timezone(&chrono_tz::America::Los_Angeles);
        Ok(date_and_time_at(&now))
    }
}

/// Build the tool result for a fixed instant.
pub fn date_and_time_at(now: &DateTime<Tz>) -> Value {
    json!({
        "formattedTime": now.format("%I:%M %p").to_string(),
        "date": now.format("%Y-%m-%d").to_string(),
        "year": now.year(),
        "month": now.month(),
        "day": now.day(),
        "dayOfWeek": now.format("%A").to_string().to_uppercase(),
        "timezone": TIMEZONE_LABEL,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Weekday};

    #[test]
    fn test_fields_for_fixed_instant() {
        let instant = chrono_tz::America::Los_Angeles
            .with_ymd_and_hms(2024, 7, 4, 15, 5, 0)
            .unwrap();
        let result = date_and_time_at(&instant);

        assert_eq!(result["formattedTime"], "03:05 PM");
        assert_eq!(result["date"], "2024-07-04");
        assert_eq!(result["year"], 2024);
        assert_eq!(result["month"], 7);
        assert_eq!(result["day"], 4);
        assert_eq!(result["dayOfWeek"], "THURSDAY");
        // Daylight saving time is in effect, the label stays fixed.
        assert_eq!(result["timezone"], "PST");
    }

    #[tokio::test]
    async fn test_weekday_matches_date() {
        let result = DateAndTimeTool.invoke(json!({})).await.unwrap();

        let date = NaiveDate::parse_from_str(result["date"].as_str().unwrap(), "%Y-%m-%d").unwrap();
        let expected = match date.weekday() {
            Weekday::Mon => "MONDAY",
            Weekday::Tue => "TUESDAY",
            Weekday::Wed => "WEDNESDAY",
            Weekday::Thu => "THURSDAY",
            Weekday::Fri => "FRIDAY",
            Weekday::Sat => "SATURDAY",
            Weekday::Sun => "SUNDAY",
        };
        assert_eq!(result["dayOfWeek"], expected);
        assert_eq!(result["year"], date.year());
        assert_eq!(result["month"], date.month());
        assert_eq!(result["day"], date.day());
    }

    #[test]
    fn test_spec_schema_is_empty_object() {
        let spec = DateAndTimeTool.spec();
        assert_eq!(spec.name, "getDateAndTimeTool");
        assert_eq!(spec.input_schema["required"], json!([]));
    }
}

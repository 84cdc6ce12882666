//! `trackOrderTool`: a self-contained order tracking simulator.
//!
//! Results are deterministic per order id. The id is hashed with MD5, the
//! big-endian 128-bit digest is reduced modulo 10000, and the result seeds a
//! `rand` 0.8 [`StdRng`] (ChaCha12). The status is drawn with
//! [`WeightedIndex`] over [`ORDER_STATUSES`], then the day offset is drawn from
//! the same generator with `gen_range`.

use async_trait::async_trait;
use chrono::{Days, Local, NaiveDate};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};

use super::{ToolCallResult, ToolError, ToolHandler, ToolSpec};

pub const TRACK_ORDER_TOOL_NAME: &str = "trackOrderTool";

/// Statuses and their relative weights, in draw order.
pub const ORDER_STATUSES: [(&str, u32); 8] = [
    ("Order received", 10),
    ("Processing", 15),
    ("Preparing for shipment", 15),
    ("Shipped", 20),
    ("In transit", 20),
    ("Out for delivery", 10),
    ("Delivered", 5),
    ("Delayed", 3),
];

const DELIVERED: &str = "Delivered";
const OUT_FOR_DELIVERY: &str = "Out for delivery";
const IN_TRANSIT: &str = "In transit";
const DELAYED: &str = "Delayed";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default)]
pub struct TrackOrderTool;

#[async_trait]
impl ToolHandler for TrackOrderTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TRACK_ORDER_TOOL_NAME.to_string(),
            description: "Retrieves real-time order tracking information and detailed status \
                          updates for customer orders by order ID. Provides estimated delivery \
                          dates. Use this tool when customers ask about their order status or \
                          delivery timeline."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "orderId": {
                        "type": "string",
                        "description": "The order number or ID to track"
                    },
                    "requestNotifications": {
                        "type": "boolean",
                        "description": "Whether to set up notifications for this order",
                        "default": false
                    }
                },
                "required": ["orderId"]
            }),
        }
    }

    async fn invoke(&self, arguments: Value) -> ToolCallResult<Value> {
        let Some(order_id) = order_id_from(arguments.get("orderId")) else {
            return Ok(invalid_order_id());
        };
        let notify = arguments
            .get("requestNotifications")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        track_order_on(&order_id, notify, Local::now().date_naive())
    }
}

/// Accept strings and integers; everything else is an invalid id.
fn order_id_from(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

fn invalid_order_id() -> Value {
    json!({
        "error": "Invalid order ID format",
        "orderStatus": "",
        "estimatedDelivery": "",
        "lastUpdate": "",
    })
}

/// Seed in `[0, 10000)` derived from the order id.
pub fn order_seed(order_id: &str) -> u64 {
    let digest = md5::compute(order_id.as_bytes());
    (u128::from_be_bytes(digest.0) % 10_000) as u64
}

/// Compute the tracking result for `order_id` relative to `today`.
///
/// An empty id yields the error-shaped result.
pub fn track_order_on(
    order_id: &str,
    request_notifications: bool,
    today: NaiveDate,
) -> ToolCallResult<Value> {
    if order_id.is_empty() {
        return Ok(invalid_order_id());
    }

    let mut rng = StdRng::seed_from_u64(order_seed(order_id));
    let weights = WeightedIndex::new(ORDER_STATUSES.iter().map(|(_, w)| *w))
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    let status = ORDER_STATUSES[weights.sample(&mut rng)].0;

    let delivery = match status {
        DELIVERED => today.checked_sub_days(Days::new(rng.gen_range(0..=3))),
        OUT_FOR_DELIVERY => Some(today),
        _ => today.checked_add_days(Days::new(rng.gen_range(1..=10))),
    }
    .ok_or_else(|| ToolError::Execution("delivery date out of range".to_string()))?
    .format(DATE_FORMAT)
    .to_string();

    let notification = if request_notifications && status != DELIVERED {
        format!("You will receive notifications for order {}", order_id)
    } else {
        String::new()
    };

    let mut info = Map::new();
    info.insert("orderStatus".into(), status.into());
    info.insert("orderNumber".into(), order_id.into());
    info.insert("notificationStatus".into(), notification.into());

    match status {
        DELIVERED => {
            info.insert("deliveredOn".into(), delivery.into());
            info.insert("deliveryLocation".into(), "Front Door".into());
        }
        OUT_FOR_DELIVERY => {
            info.insert("expectedDelivery".into(), "Today".into());
        }
        _ => {
            info.insert("estimatedDelivery".into(), delivery.into());
        }
    }
    if status == IN_TRANSIT {
        info.insert("currentLocation".into(), "Distribution Center".into());
    }
    if status == DELAYED {
        info.insert("additionalInfo".into(), "Weather delays possible".into());
    }

    Ok(Value::Object(info))
}

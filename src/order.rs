//! Order documents as they travel through the relay.
//!
//! The relay itself never validates orders: intake forwards raw bytes and the
//! consumer persists whatever JSON it parses. `Order` exists for producers of
//! orders (the virtual customer) and for log summaries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "customerId")]
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    /// Fields the relay does not know about, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product references are numeric or string ids depending on the catalog.
    #[serde(rename = "productId")]
    pub product_id: Value,
    pub quantity: u32,
    pub price: f64,
}

impl Order {
    /// A random order shaped like the ones a storefront would submit:
    /// one to four items, product ids 1 to 9, quantities 1 to 4.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let customer_id = rng.gen_range(1_000_000_000u32..2_147_483_647).to_string();
        let items = (0..rng.gen_range(1..=4))
            .map(|_| OrderItem {
                product_id: Value::from(rng.gen_range(1u32..=9)),
                quantity: rng.gen_range(1..=4),
                price: (rng.gen_range(1.0..100.0f64) * 100.0).round() / 100.0,
            })
            .collect();

        Self {
            customer_id,
            items,
            extra: Map::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.items
            .iter()
            .map(|item| item.price * f64::from(item.quantity))
            .sum()
    }
}

/// One-line description of a payload for logs. Falls back to the byte count
/// when the payload is not an order.
pub fn summarize(payload: &[u8]) -> String {
    match serde_json::from_slice::<Order>(payload) {
        Ok(order) => format!(
            "order for customer {} with {} item(s)",
            order.customer_id,
            order.items.len()
        ),
        Err(_) => format!("{} byte payload", payload.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_storefront_order_and_keeps_unknown_fields() {
        let raw = json!({
            "customerId": "c1",
            "items": [{"productId": "p1", "quantity": 2, "price": 9.99}],
            "channel": "web"
        });
        let order: Order = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(order.customer_id, "c1");
        assert_eq!(order.items[0].product_id, json!("p1"));
        assert_eq!(order.extra["channel"], json!("web"));
        assert_eq!(serde_json::to_value(&order).unwrap(), raw);
    }

    #[test]
    fn random_orders_stay_in_range() {
        for _ in 0..50 {
            let order = Order::random();
            assert!((1..=4).contains(&order.items.len()));
            for item in &order.items {
                let id = item.product_id.as_u64().unwrap();
                assert!((1..=9).contains(&id));
                assert!((1..=4).contains(&item.quantity));
                assert!(item.price >= 1.0 && item.price <= 100.0);
            }
        }
    }

    #[test]
    fn total_multiplies_quantity_by_price() {
        let order: Order = serde_json::from_value(json!({
            "customerId": "c1",
            "items": [
                {"productId": 1, "quantity": 2, "price": 1.5},
                {"productId": 2, "quantity": 1, "price": 4.0}
            ]
        }))
        .unwrap();
        assert!((order.total() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_of_non_orders_is_the_size() {
        assert_eq!(summarize(b"\"not json\""), "10 byte payload");
        assert_eq!(
            summarize(br#"{"customerId":"c1","items":[]}"#),
            "order for customer c1 with 0 item(s)"
        );
    }
}

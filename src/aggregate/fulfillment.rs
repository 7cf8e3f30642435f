//! Fulfillment Aggregate
//!
//! Shipping lifecycle for an order's items: pending -> shipped -> delivered,
//! with cancellation possible until delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::DomainError;

use super::{Aggregate, AggregateState};

/// Fulfillment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One fulfilled line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentLine {
    pub variant_id: String,
    pub quantity: i64,
}

/// Fulfillment snapshot state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentState {
    pub order_id: String,
    pub items: Vec<FulfillmentLine>,
    pub status: FulfillmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AggregateState for FulfillmentState {
    fn aggregate_type(&self) -> &'static str {
        "fulfillment"
    }
}

pub type Fulfillment = Aggregate<FulfillmentState>;

impl Aggregate<FulfillmentState> {
    /// Create a pending fulfillment for an order.
    pub fn create(
        id: String,
        order_id: String,
        items: Vec<FulfillmentLine>,
    ) -> Result<Self, DomainError> {
        if order_id.trim().is_empty() {
            return Err(DomainError::Validation("order id is required".to_string()));
        }
        if items.is_empty() {
            return Err(DomainError::Validation(
                "fulfillment requires at least one item".to_string(),
            ));
        }
        for item in &items {
            if item.quantity <= 0 {
                return Err(DomainError::Validation(format!(
                    "quantity for variant {} must be positive",
                    item.variant_id
                )));
            }
        }

        let state = FulfillmentState {
            order_id,
            items,
            status: FulfillmentStatus::Pending,
            tracking_number: None,
            carrier: None,
            shipped_at: None,
            delivered_at: None,
            created_at: Utc::now(),
        };

        Self::genesis(id, state)
            .map_err(|e| DomainError::Validation(format!("state serialization failed: {}", e)))
    }

    /// Ship the fulfillment with tracking details.
    pub fn ship(&mut self, tracking_number: String, carrier: String) -> Result<(), DomainError> {
        if self.state.status != FulfillmentStatus::Pending {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "shipped",
            ));
        }
        if tracking_number.trim().is_empty() {
            return Err(DomainError::Validation(
                "tracking number is required".to_string(),
            ));
        }

        let prior = json!({
            "status": self.state.status,
            "trackingNumber": self.state.tracking_number,
            "carrier": self.state.carrier,
        });
        self.state.status = FulfillmentStatus::Shipped;
        self.state.tracking_number = Some(tracking_number);
        self.state.carrier = Some(carrier);
        self.state.shipped_at = Some(Utc::now());
        self.record(
            "shipped",
            prior,
            json!({
                "status": self.state.status,
                "trackingNumber": self.state.tracking_number,
                "carrier": self.state.carrier,
                "shippedAt": self.state.shipped_at,
            }),
        );
        Ok(())
    }

    /// Mark as delivered. Only shipped fulfillments can be delivered.
    pub fn deliver(&mut self) -> Result<(), DomainError> {
        if self.state.status != FulfillmentStatus::Shipped {
            return Err(DomainError::illegal_transition(
                self.state.status.as_str(),
                "delivered",
            ));
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = FulfillmentStatus::Delivered;
        self.state.delivered_at = Some(Utc::now());
        self.record(
            "delivered",
            prior,
            json!({ "status": self.state.status, "deliveredAt": self.state.delivered_at }),
        );
        Ok(())
    }

    /// Cancel the fulfillment. Not possible once delivered; terminal.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        match self.state.status {
            FulfillmentStatus::Pending | FulfillmentStatus::Shipped => {}
            other => {
                return Err(DomainError::illegal_transition(other.as_str(), "cancelled"));
            }
        }

        let prior = json!({ "status": self.state.status });
        self.state.status = FulfillmentStatus::Cancelled;
        self.record("cancelled", prior, json!({ "status": self.state.status }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(variant_id: &str, quantity: i64) -> FulfillmentLine {
        FulfillmentLine {
            variant_id: variant_id.to_string(),
            quantity,
        }
    }

    fn fresh() -> Fulfillment {
        Fulfillment::create(
            "ful-1".to_string(),
            "order-1".to_string(),
            vec![line("var-1", 2)],
        )
        .unwrap()
    }

    #[test]
    fn test_create_fulfillment() {
        let fulfillment = fresh();

        assert_eq!(fulfillment.state().status, FulfillmentStatus::Pending);
        assert_eq!(fulfillment.uncommitted()[0].event_name, "fulfillment.created");
    }

    #[test]
    fn test_create_rejects_bad_items() {
        assert!(Fulfillment::create("f".to_string(), "o".to_string(), vec![]).is_err());
        assert!(
            Fulfillment::create("f".to_string(), "o".to_string(), vec![line("v", 0)]).is_err()
        );
        assert!(
            Fulfillment::create("f".to_string(), "o".to_string(), vec![line("v", -1)]).is_err()
        );
    }

    #[test]
    fn test_cannot_deliver_from_pending() {
        let mut fulfillment = fresh();
        assert!(fulfillment.deliver().is_err());
    }

    #[test]
    fn test_ship_then_deliver() {
        let mut fulfillment = fresh();

        fulfillment
            .ship("TRACK123".to_string(), "ups".to_string())
            .unwrap();
        assert_eq!(fulfillment.state().status, FulfillmentStatus::Shipped);
        assert!(fulfillment.state().shipped_at.is_some());

        // Cannot ship twice
        assert!(fulfillment
            .ship("TRACK456".to_string(), "ups".to_string())
            .is_err());

        fulfillment.deliver().unwrap();
        assert_eq!(fulfillment.state().status, FulfillmentStatus::Delivered);
        assert!(fulfillment.state().delivered_at.is_some());
    }

    #[test]
    fn test_ship_requires_tracking() {
        let mut fulfillment = fresh();
        assert!(fulfillment.ship("  ".to_string(), "ups".to_string()).is_err());
    }

    #[test]
    fn test_cancel_rules() {
        // Cancel from pending
        let mut fulfillment = fresh();
        fulfillment.cancel().unwrap();
        // Cannot un-cancel
        assert!(fulfillment.ship("T".to_string(), "ups".to_string()).is_err());
        assert!(fulfillment.cancel().is_err());

        // Cancel from shipped
        let mut fulfillment = fresh();
        fulfillment.ship("T".to_string(), "ups".to_string()).unwrap();
        fulfillment.cancel().unwrap();

        // Cannot cancel after delivery
        let mut fulfillment = fresh();
        fulfillment.ship("T".to_string(), "ups".to_string()).unwrap();
        fulfillment.deliver().unwrap();
        assert!(fulfillment.cancel().is_err());
    }

    #[test]
    fn test_ship_event_delta() {
        let mut fulfillment = fresh();
        fulfillment
            .ship("TRACK123".to_string(), "ups".to_string())
            .unwrap();

        let event = fulfillment.uncommitted().last().unwrap();
        assert_eq!(event.event_name, "fulfillment.shipped");
        assert_eq!(event.prior_state["status"], "pending");
        assert_eq!(event.prior_state["trackingNumber"], serde_json::Value::Null);
        assert_eq!(event.new_state["trackingNumber"], "TRACK123");
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attribution::{AttributionDimension, SESSION_EVENT_NAME};

/// A tracked event, mirroring the `events` table. `timestamp` is unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub event_name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Snapshot of the user's properties when the event was tracked.
    #[serde(default)]
    pub user_properties: Map<String, Value>,
    pub timestamp: i64,
}

impl Event {
    pub fn new(project_id: &str, user_id: &str, event_name: &str, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            event_name: event_name.to_string(),
            properties: Map::new(),
            user_properties: Map::new(),
            timestamp,
        }
    }

    /// A `$session` event carrying a value for `dimension`.
    pub fn session(
        project_id: &str,
        user_id: &str,
        dimension: AttributionDimension,
        value: &str,
        timestamp: i64,
    ) -> Self {
        Self::new(project_id, user_id, SESSION_EVENT_NAME, timestamp)
            .with_property(dimension.session_property(), value)
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn with_user_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.user_properties.insert(key.to_string(), value.into());
        self
    }
}

/// A raw user. `customer_user_id` links several raw users to one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub project_id: String,
    pub customer_user_id: Option<String>,
}

impl User {
    pub fn new(project_id: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            project_id: project_id.to_string(),
            customer_user_id: None,
        }
    }

    pub fn identified(project_id: &str, id: &str, customer_user_id: &str) -> Self {
        Self {
            customer_user_id: Some(customer_user_id.to_string()),
            ..Self::new(project_id, id)
        }
    }

    /// The identity attribution counts this user under.
    pub fn coalesced_id(&self) -> &str {
        self.customer_user_id.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_carries_dimension_property() {
        let event = Event::session("p1", "u1", AttributionDimension::Campaign, "spring_sale", 100);
        assert_eq!(event.event_name, "$session");
        assert_eq!(event.properties["$campaign"], "spring_sale");
        assert!(!event.id.is_empty());
    }

    #[test]
    fn coalesced_id_prefers_customer_id() {
        assert_eq!(User::new("p1", "u1").coalesced_id(), "u1");
        assert_eq!(User::identified("p1", "u1", "c1").coalesced_id(), "c1");
    }
}

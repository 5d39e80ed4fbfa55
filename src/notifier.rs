//! Business-event publishing
//!
//! Order and food handlers call `OrderNotifier` instead of picking rooms
//! themselves. Order events go to admins and to the ordering user; food
//! events go to everyone.

use serde::Serialize;

use crate::dispatcher::HubHandle;
use crate::message::events;

/// Routes restaurant events to the right rooms
#[derive(Debug, Clone)]
pub struct OrderNotifier {
    hub: HubHandle,
}

impl OrderNotifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    pub fn new_order_placed<T: Serialize + ?Sized>(&self, order: &T, user_id: Option<&str>) {
        self.to_admins_and_user(events::NEW_ORDER_PLACED, order, user_id);
    }

    pub fn order_status_changed<T: Serialize + ?Sized>(&self, order: &T, user_id: Option<&str>) {
        self.to_admins_and_user(events::ORDER_STATUS_CHANGED, order, user_id);
    }

    pub fn payment_success<T: Serialize + ?Sized>(&self, order: &T, user_id: Option<&str>) {
        self.to_admins_and_user(events::PAYMENT_SUCCESS, order, user_id);
    }

    /// Only admins see deletions
    pub fn order_deleted(&self, order_id: &str) {
        self.hub.publish_to_admins(events::ORDER_DELETED, order_id);
    }

    pub fn food_added<T: Serialize + ?Sized>(&self, food: &T) {
        self.hub.publish_to_all(events::NEW_FOOD_ADDED, food);
    }

    pub fn food_updated<T: Serialize + ?Sized>(&self, food: &T) {
        self.hub.publish_to_all(events::FOOD_UPDATED, food);
    }

    pub fn food_deleted(&self, food_id: &str) {
        self.hub.publish_to_all(events::FOOD_DELETED, food_id);
    }

    fn to_admins_and_user<T: Serialize + ?Sized>(&self, event: &str, order: &T, user_id: Option<&str>) {
        self.hub.publish_to_admins(event, order);
        if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
            self.hub.publish_to_user(user_id, event, order);
        }
    }
}

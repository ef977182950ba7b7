use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::notifications::RealtimeNotifier;

/// Domain events emitted by the services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderDelivered(Uuid),
    OrderDeleted(Uuid),

    UserRegistered(Uuid),

    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),

    ReviewCreated { product_id: Uuid, review_id: Uuid },
}

impl Event {
    /// Channel name published to the realtime feed. Order events keep the
    /// names the storefront subscribes to.
    pub fn channel(&self) -> &'static str {
        match self {
            Event::OrderCreated(_) => "orderCreated",
            Event::OrderPaid(_) => "orderPaid",
            Event::OrderDelivered(_) => "orderDelivered",
            Event::OrderDeleted(_) => "orderDeleted",
            Event::UserRegistered(_) => "userRegistered",
            Event::ProductCreated(_) => "productCreated",
            Event::ProductUpdated(_) => "productUpdated",
            Event::ProductDeleted(_) => "productDeleted",
            Event::ReviewCreated { .. } => "reviewCreated",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Event::OrderCreated(id)
            | Event::OrderPaid(id)
            | Event::OrderDelivered(id)
            | Event::OrderDeleted(id) => json!({ "orderId": id }),
            Event::UserRegistered(id) => json!({ "userId": id }),
            Event::ProductCreated(id)
            | Event::ProductUpdated(id)
            | Event::ProductDeleted(id) => json!({ "productId": id }),
            Event::ReviewCreated {
                product_id,
                review_id,
            } => json!({ "productId": product_id, "reviewId": review_id }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; failure means the processing task is gone.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel and forwards each event to the realtime feed.
/// Delivery is best-effort: a failed publish is logged and never fails the
/// request that produced the event.
pub async fn process_events(
    mut receiver: mpsc::Receiver<Event>,
    notifier: Option<Arc<dyn RealtimeNotifier>>,
) {
    while let Some(event) = receiver.recv().await {
        info!(channel = event.channel(), "processing event");

        if let Some(notifier) = &notifier {
            if let Err(e) = notifier.publish(event.channel(), event.payload()).await {
                warn!(channel = event.channel(), error = %e, "realtime publish failed");
            }
        }
    }
    info!("event channel closed, processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::InMemoryNotifier;

    #[test]
    fn order_events_keep_storefront_channel_names() {
        let id = Uuid::new_v4();
        assert_eq!(Event::OrderPaid(id).channel(), "orderPaid");
        assert_eq!(Event::OrderDelivered(id).channel(), "orderDelivered");
        assert_eq!(Event::OrderDeleted(id).channel(), "orderDeleted");
        assert_eq!(Event::OrderPaid(id).payload()["orderId"], json!(id));
    }

    #[tokio::test]
    async fn processor_forwards_events_to_the_notifier() {
        let notifier = Arc::new(InMemoryNotifier::default());
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let task = tokio::spawn(process_events(
            rx,
            Some(notifier.clone() as Arc<dyn RealtimeNotifier>),
        ));

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderPaid(order_id)).await.unwrap();
        drop(sender);
        task.await.unwrap();

        let published = notifier.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "orderPaid");
        assert_eq!(published[0].1["orderId"], json!(order_id));
    }
}

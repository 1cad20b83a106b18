//! Subscription to one channel's metadata topic.

use crate::error::SubscriptionFailure;
use crate::metadata::MetadataUpdate;
use crate::transport::{Channel, JoinReply, Socket};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix of every metadata topic
pub const TOPIC_NAMESPACE: &str = "broadcast:metadata";

/// Event carrying new metadata
pub const UPDATE_EVENT: &str = "update";

/// Topic holding the metadata of `channel_id`
pub fn topic_for(channel_id: &str) -> String {
    format!("{TOPIC_NAMESPACE}:{channel_id}")
}

/// A joined metadata topic.
pub(crate) struct Subscription {
    channel: Arc<dyn Channel>,
}

impl Subscription {
    /// Register the update handler on the channel's topic, then join it.
    ///
    /// Undecodable payloads are logged and dropped; `on_update` only sees
    /// well-formed updates, in delivery order.
    pub(crate) async fn join<F>(
        socket: &dyn Socket,
        channel_id: &str,
        on_update: F,
    ) -> std::result::Result<Self, SubscriptionFailure>
    where
        F: Fn(MetadataUpdate) + Send + Sync + 'static,
    {
        let topic = topic_for(channel_id);
        let channel = socket.channel(&topic);

        let handler_topic = topic.clone();
        channel.on(
            UPDATE_EVENT,
            Arc::new(move |payload| {
                debug!(topic = %handler_topic, %payload, "Update");
                match MetadataUpdate::from_payload(payload) {
                    Ok(update) => on_update(update),
                    Err(err) => {
                        warn!(topic = %handler_topic, "Dropping malformed update: {err}")
                    }
                }
            }),
        );

        match channel.join().await {
            JoinReply::Ok(response) => {
                info!(topic = %topic, %response, "Subscribed to the metadata channel");
                Ok(Self { channel })
            }
            JoinReply::Error(reason) => {
                warn!(topic = %topic, reason = %reason, "Failed to subscribe to the metadata channel");
                Err(SubscriptionFailure::Rejected(reason))
            }
            JoinReply::Timeout => {
                warn!(topic = %topic, "Failed to subscribe to the metadata channel: timeout");
                Err(SubscriptionFailure::Timeout)
            }
        }
    }

    pub(crate) fn topic(&self) -> &str {
        self.channel.topic()
    }

    pub(crate) fn leave(self) {
        debug!(topic = %self.topic(), "Leaving the metadata channel");
        self.channel.leave();
    }
}

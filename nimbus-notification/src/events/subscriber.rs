use std::sync::Arc;

use futures_lite::StreamExt;
use lapin::options::BasicAckOptions;

use nimbus_shared::types::event::{payloads, routing_keys, Event};

use crate::services::dispatch::{self, SendNotification};
use crate::services::store::DieselStore;
use crate::AppState;

/// Listen for queued dispatch requests and run the dispatch engine on each.
/// One delivery is one full dispatch across all its batches.
pub async fn listen_send_requests(state: Arc<AppState>) -> anyhow::Result<()> {
    let mut consumer = state.rabbitmq.subscribe(
        "nimbus-notification.send",
        routing_keys::NOTIFICATION_SEND_REQUESTED,
    ).await?;

    tracing::info!("listening for notification send requests");

    while let Some(delivery) = consumer.next().await {
        match delivery {
            Ok(delivery) => {
                match serde_json::from_slice::<Event<payloads::SendNotificationRequested>>(&delivery.data) {
                    Ok(event) => {
                        tracing::info!(
                            event_id = %event.id,
                            user_ids = event.data.user_ids.len(),
                            user_emails = event.data.user_emails.len(),
                            "received notification.send.requested event"
                        );

                        if let Err(e) = run_dispatch(&state, event.data).await {
                            tracing::error!(error = %e, "queued dispatch failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to deserialize notification.send.requested event");
                    }
                }

                let _ = delivery.ack(BasicAckOptions::default()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "send request consumer error");
            }
        }
    }

    Ok(())
}

async fn run_dispatch(
    state: &AppState,
    payload: payloads::SendNotificationRequested,
) -> anyhow::Result<()> {
    let notification_type = payload.notification_type.parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let request = SendNotification {
        notification_type,
        title: payload.title,
        body: payload.body,
        user_ids: payload.user_ids,
        user_emails: payload.user_emails,
        data: payload.data,
        image: payload.image,
    };

    let mut conn = state.db.get()?;
    let mut store = DieselStore::new(&mut conn);

    let outcome = dispatch::dispatch(&mut store, state.push.as_ref(), &request).await?;
    tracing::info!(outcome = %outcome, "queued dispatch completed");

    Ok(())
}

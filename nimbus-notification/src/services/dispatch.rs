//! Push dispatch and reconciliation engine.
//!
//! Resolves recipients to device tokens, sends through the multicast push
//! provider in bounded batches, reconciles per-token outcomes back to users,
//! and persists exactly one notification row per targeted user.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use nimbus_shared::clients::push::{PushClient, PushMessage, PushResult};
use nimbus_shared::errors::AppResult;

use crate::models::{Device, EntityStatus, NewNotification, NotificationStatus, NotificationType, User};
use crate::services::store::DispatchStore;

/// FCM caps a multicast call at 500 tokens; stay under with margin.
pub const MULTICAST_BATCH_SIZE: usize = 450;

pub const SAVED_LABEL: &str = "Notification saved successfully";
pub const SENT_LABEL: &str = "Notification sent successfully";

/// One logical notification addressed to a set of users, or to all users
/// when both filters are empty.
#[derive(Debug, Clone)]
pub struct SendNotification {
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub user_ids: Vec<Uuid>,
    pub user_emails: Vec<String>,
    pub data: Option<Value>,
    pub image: Option<String>,
}

/// Per-user outcome of one batch: a message id paired with the device it was
/// attributed to. Users without a decision fall back to the batch-wide flag.
#[derive(Debug, Clone)]
struct Decision {
    message_id: String,
    device_id: Uuid,
}

/// Runs one full dispatch: resolve, batch, send, reconcile, persist.
///
/// Returns a human-readable outcome label. Provider failures degrade the
/// affected batch to stored-only rows; persistence failures propagate.
pub async fn dispatch<S, P>(
    store: &mut S,
    push: &P,
    request: &SendNotification,
) -> AppResult<&'static str>
where
    S: DispatchStore,
    P: PushClient + ?Sized,
{
    let data = strip_null_values(request.data.as_ref());

    let recipients = store.load_recipients(&request.user_ids, &request.user_emails)?;
    let device_tokens = collect_tokens(&recipients);

    if device_tokens.is_empty() && !recipients.is_empty() {
        let rows: Vec<NewNotification> = recipients
            .iter()
            .map(|(user, _)| build_notification(request, &data, user.id, None, None, false))
            .collect();
        store.save_notifications(&rows)?;

        tracing::info!(rows = rows.len(), "no device tokens, notifications stored only");
        return Ok(SAVED_LABEL);
    }

    let message = PushMessage {
        title: request.title.clone(),
        body: request.body.clone(),
        data: wire_data(&data),
        image: request.image.clone(),
    };

    let mut decided: HashSet<Uuid> = HashSet::new();

    for batch in chunk_tokens(&device_tokens, MULTICAST_BATCH_SIZE) {
        let batch_set: HashSet<&str> = batch.iter().map(|t| t.as_str()).collect();

        // Every token batch goes out. Reconciliation and persistence are
        // restricted to still-undecided users owning a token in the batch,
        // so multi-batch dispatches write each user exactly once.
        let batch_users: Vec<(Uuid, &[Device])> = recipients
            .iter()
            .filter(|(user, devices)| {
                !decided.contains(&user.id)
                    && devices.iter().any(|d| batch_set.contains(d.device_token.as_str()))
            })
            .map(|(user, devices)| (user.id, devices.as_slice()))
            .collect();

        let response = match push.send_multicast(&message, batch).await {
            Ok(resp) if !resp.responses.is_empty() => Some(resp),
            Ok(_) => {
                tracing::warn!(batch_size = batch.len(), "push provider returned no per-token outcomes");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, batch_size = batch.len(), "push provider call failed");
                None
            }
        };

        // Every token holder here was persisted by an earlier batch; the
        // send stands on its own, there is nothing left to record.
        if batch_users.is_empty() {
            continue;
        }

        let rows: Vec<NewNotification> = match response {
            Some(resp) => {
                let (decisions, all_failed) = reconcile_batch(&batch_users, &resp.responses);

                batch_users
                    .iter()
                    .map(|(user_id, _)| {
                        let decision = decisions.get(user_id);
                        build_notification(
                            request,
                            &data,
                            *user_id,
                            if all_failed { None } else { decision.map(|d| d.message_id.clone()) },
                            decision.map(|d| d.device_id),
                            !all_failed,
                        )
                    })
                    .collect()
            }
            None => batch_users
                .iter()
                .map(|(user_id, _)| build_notification(request, &data, *user_id, None, None, false))
                .collect(),
        };

        store.save_notifications(&rows)?;
        decided.extend(batch_users.iter().map(|(user_id, _)| *user_id));

        tracing::debug!(batch_size = batch.len(), rows = rows.len(), "batch persisted");
    }

    // Users never covered by any batch: opted out, or no devices of their
    // own while others had tokens.
    let leftover: Vec<NewNotification> = recipients
        .iter()
        .filter(|(user, _)| !decided.contains(&user.id))
        .map(|(user, _)| build_notification(request, &data, user.id, None, None, false))
        .collect();
    if !leftover.is_empty() {
        store.save_notifications(&leftover)?;
    }

    tracing::info!(
        users = recipients.len(),
        tokens = device_tokens.len(),
        "dispatch completed"
    );
    Ok(SENT_LABEL)
}

/// Splits tokens into consecutive, order-preserving chunks of at most `size`.
fn chunk_tokens(tokens: &[String], size: usize) -> impl Iterator<Item = &[String]> {
    tokens.chunks(size)
}

/// Flattens the device tokens of opted-in users, in recipient order.
fn collect_tokens(recipients: &[(User, Vec<Device>)]) -> Vec<String> {
    let mut tokens = Vec::new();
    for (user, devices) in recipients {
        if user.allow_notification {
            tokens.extend(devices.iter().map(|d| d.device_token.clone()));
        }
    }
    tokens
}

/// Reconciles one batch's per-token outcomes into at most one decision per
/// user, plus the batch-wide `all_failed` flag.
///
/// The flag, not the per-user decision, gates the status label: a single
/// accepted token anywhere marks every row in the batch as sent, even for
/// users whose own devices all failed.
fn reconcile_batch(
    batch_users: &[(Uuid, &[Device])],
    responses: &[PushResult],
) -> (HashMap<Uuid, Decision>, bool) {
    let mut all_failed = true;
    let mut decisions: HashMap<Uuid, Decision> = HashMap::new();

    // Cover every device in the mapping, not just tokens in the response,
    // so outcomes are attributed correctly.
    let mut token_owner: HashMap<&str, (Uuid, &[Device])> = HashMap::new();
    for (user_id, devices) in batch_users {
        for device in *devices {
            token_owner.insert(device.device_token.as_str(), (*user_id, *devices));
        }
    }

    for outcome in responses {
        // Tokens we do not know about are stale or foreign data; skip them.
        let Some((user_id, devices)) = token_owner.get(outcome.token.as_str()).copied() else {
            continue;
        };

        if outcome.success {
            all_failed = false;

            // First success wins per user; later successes are ignored.
            if !decisions.contains_key(&user_id) {
                let owned_active = devices.iter().find(|d| {
                    d.device_token == outcome.token && d.is_active && d.user_id == user_id
                });
                if let (Some(device), Some(message_id)) = (owned_active, outcome.message_id.as_ref()) {
                    decisions.insert(
                        user_id,
                        Decision {
                            message_id: message_id.clone(),
                            device_id: device.id,
                        },
                    );
                }
            }
        } else if !decisions.contains_key(&user_id) {
            // The provider rejected this device; another device of the same
            // user may still have been accepted.
            if let Some(borrowed) = first_successful_sibling(responses, user_id, devices) {
                decisions.insert(user_id, borrowed);
            }
        }
    }

    (decisions, all_failed)
}

/// Scans the response list once, in original order, and returns the first
/// successful entry whose token belongs to one of this user's active devices.
/// Response order is behaviorally significant here; do not reorder.
fn first_successful_sibling(
    responses: &[PushResult],
    user_id: Uuid,
    devices: &[Device],
) -> Option<Decision> {
    for entry in responses {
        if !entry.success {
            continue;
        }
        let Some(message_id) = entry.message_id.as_ref() else {
            continue;
        };
        if let Some(device) = devices
            .iter()
            .find(|d| d.device_token == entry.token && d.is_active && d.user_id == user_id)
        {
            return Some(Decision {
                message_id: message_id.clone(),
                device_id: device.id,
            });
        }
    }
    None
}

/// Builds one notification row. Rows without a provider message id get a
/// locally generated identifier; the column is never null.
fn build_notification(
    request: &SendNotification,
    data: &serde_json::Map<String, Value>,
    user_id: Uuid,
    message_id: Option<String>,
    device_id: Option<Uuid>,
    is_sent: bool,
) -> NewNotification {
    NewNotification {
        notification_id: message_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_id,
        device_id,
        title: request.title.clone(),
        body: request.body.clone(),
        image: request.image.clone(),
        data: Some(Value::Object(data.clone())),
        is_read: false,
        notification_status: if is_sent {
            NotificationStatus::Sent
        } else {
            NotificationStatus::StoredOnly
        },
        notification_type: request.notification_type,
        status: EntityStatus::Published,
        created_by: user_id,
    }
}

/// Drops null-valued entries from the payload map.
fn strip_null_values(data: Option<&Value>) -> serde_json::Map<String, Value> {
    match data {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => serde_json::Map::new(),
    }
}

/// FCM v1 data maps are string-to-string; stringify non-string values.
fn wire_data(data: &serde_json::Map<String, Value>) -> HashMap<String, String> {
    data.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nimbus_shared::clients::push::MulticastResponse;
    use nimbus_shared::errors::{AppError, ErrorCode};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MemoryStore {
        recipients: Vec<(User, Vec<Device>)>,
        saved: Vec<NewNotification>,
    }

    impl MemoryStore {
        fn new(recipients: Vec<(User, Vec<Device>)>) -> Self {
            Self {
                recipients,
                saved: Vec::new(),
            }
        }
    }

    impl DispatchStore for MemoryStore {
        fn load_recipients(
            &mut self,
            _user_ids: &[Uuid],
            _user_emails: &[String],
        ) -> AppResult<Vec<(User, Vec<Device>)>> {
            Ok(self.recipients.clone())
        }

        fn save_notifications(&mut self, rows: &[NewNotification]) -> AppResult<()> {
            self.saved.extend(rows.iter().cloned());
            Ok(())
        }
    }

    struct ScriptedPush {
        script: Mutex<VecDeque<Result<MulticastResponse, AppError>>>,
        calls: Mutex<Vec<Vec<String>>>,
        messages: Mutex<Vec<PushMessage>>,
    }

    impl ScriptedPush {
        fn new(script: Vec<Result<MulticastResponse, AppError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn tokens_of_call(&self, index: usize) -> Vec<String> {
            self.calls.lock().unwrap()[index].clone()
        }

        fn last_message(&self) -> PushMessage {
            self.messages.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushClient for ScriptedPush {
        async fn send_multicast(
            &self,
            message: &PushMessage,
            tokens: &[String],
        ) -> Result<MulticastResponse, AppError> {
            self.calls.lock().unwrap().push(tokens.to_vec());
            self.messages.lock().unwrap().push(message.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(MulticastResponse::default()))
        }
    }

    fn user(allow_notification: bool) -> User {
        User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            allow_notification,
        }
    }

    fn device(user_id: Uuid, token: &str, is_active: bool) -> Device {
        Device {
            id: Uuid::new_v4(),
            user_id,
            device_token: token.to_string(),
            device_type: "android".to_string(),
            is_active,
            status: EntityStatus::Published,
        }
    }

    fn request() -> SendNotification {
        SendNotification {
            notification_type: NotificationType::Normal,
            title: "Title".to_string(),
            body: "Body".to_string(),
            user_ids: Vec::new(),
            user_emails: Vec::new(),
            data: None,
            image: None,
        }
    }

    fn ok_result(token: &str, message_id: &str) -> PushResult {
        PushResult {
            token: token.to_string(),
            success: true,
            message_id: Some(message_id.to_string()),
            error: None,
        }
    }

    fn failed_result(token: &str) -> PushResult {
        PushResult {
            token: token.to_string(),
            success: false,
            message_id: None,
            error: Some("unregistered".to_string()),
        }
    }

    fn response(results: Vec<PushResult>) -> Result<MulticastResponse, AppError> {
        Ok(MulticastResponse { responses: results })
    }

    fn provider_error() -> Result<MulticastResponse, AppError> {
        Err(AppError::new(ErrorCode::PushProviderError, "provider unreachable"))
    }

    #[test]
    fn chunks_preserve_order_and_size() {
        let tokens: Vec<String> = (0..1000).map(|i| format!("t{i}")).collect();

        let chunks: Vec<&[String]> = chunk_tokens(&tokens, MULTICAST_BATCH_SIZE).collect();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= MULTICAST_BATCH_SIZE));
        assert_eq!(chunks.concat(), tokens);
    }

    #[test]
    fn empty_token_list_yields_no_chunks() {
        let tokens: Vec<String> = Vec::new();
        assert_eq!(chunk_tokens(&tokens, MULTICAST_BATCH_SIZE).count(), 0);
    }

    #[tokio::test]
    async fn single_device_success_records_sent_row() {
        let u = user(true);
        let d = device(u.id, "tok-1", true);
        let mut store = MemoryStore::new(vec![(u.clone(), vec![d.clone()])]);
        let push = ScriptedPush::new(vec![response(vec![ok_result("tok-1", "m1")])]);

        let label = dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(label, SENT_LABEL);
        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::Sent);
        assert_eq!(row.notification_id, "m1");
        assert_eq!(row.device_id, Some(d.id));
        assert_eq!(row.user_id, u.id);
        assert_eq!(row.created_by, u.id);
        assert!(!row.is_read);
    }

    #[tokio::test]
    async fn users_without_devices_get_stored_only_rows() {
        let a = user(true);
        let b = user(true);
        let mut store = MemoryStore::new(vec![(a, Vec::new()), (b, Vec::new())]);
        let push = ScriptedPush::new(Vec::new());

        let label = dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(label, SAVED_LABEL);
        assert_eq!(push.call_count(), 0);
        assert_eq!(store.saved.len(), 2);
        assert!(store.saved.iter().all(|r| {
            r.notification_status == NotificationStatus::StoredOnly && r.device_id.is_none()
        }));
    }

    #[tokio::test]
    async fn all_failed_batch_is_stored_only() {
        let u = user(true);
        let d1 = device(u.id, "tok-1", true);
        let d2 = device(u.id, "tok-2", true);
        let mut store = MemoryStore::new(vec![(u, vec![d1, d2])]);
        let push = ScriptedPush::new(vec![response(vec![
            failed_result("tok-1"),
            failed_result("tok-2"),
        ])]);

        let label = dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(label, SENT_LABEL);
        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::StoredOnly);
        assert!(row.device_id.is_none());
        // locally generated identifier, never a provider message id
        assert!(Uuid::parse_str(&row.notification_id).is_ok());
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_stored_only() {
        let u = user(true);
        let d = device(u.id, "tok-1", true);
        let mut store = MemoryStore::new(vec![(u, vec![d])]);
        let push = ScriptedPush::new(vec![provider_error()]);

        let label = dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(label, SENT_LABEL);
        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::StoredOnly);
        assert!(row.device_id.is_none());
    }

    #[tokio::test]
    async fn one_success_marks_whole_batch_sent() {
        let a = user(true);
        let b = user(true);
        let da = device(a.id, "tok-a", true);
        let db = device(b.id, "tok-b", true);
        let mut store = MemoryStore::new(vec![
            (a.clone(), vec![da.clone()]),
            (b.clone(), vec![db]),
        ]);
        let push = ScriptedPush::new(vec![response(vec![
            ok_result("tok-a", "m1"),
            failed_result("tok-b"),
        ])]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(store.saved.len(), 2);
        let row_a = store.saved.iter().find(|r| r.user_id == a.id).unwrap();
        assert_eq!(row_a.notification_status, NotificationStatus::Sent);
        assert_eq!(row_a.notification_id, "m1");
        assert_eq!(row_a.device_id, Some(da.id));

        // b's own device failed and no borrow was available, yet the batch
        // flag labels the row as sent, with no message id or device attached
        let row_b = store.saved.iter().find(|r| r.user_id == b.id).unwrap();
        assert_eq!(row_b.notification_status, NotificationStatus::Sent);
        assert!(row_b.device_id.is_none());
        assert_ne!(row_b.notification_id, "m1");
        assert!(Uuid::parse_str(&row_b.notification_id).is_ok());
    }

    #[tokio::test]
    async fn failed_device_borrows_sibling_success() {
        let u = user(true);
        let d1 = device(u.id, "tok-1", true);
        let d2 = device(u.id, "tok-2", true);
        let mut store = MemoryStore::new(vec![(u, vec![d1, d2.clone()])]);
        // the failed device appears first in the response
        let push = ScriptedPush::new(vec![response(vec![
            failed_result("tok-1"),
            ok_result("tok-2", "m2"),
        ])]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::Sent);
        assert_eq!(row.notification_id, "m2");
        assert_eq!(row.device_id, Some(d2.id));
    }

    #[tokio::test]
    async fn opted_out_user_gets_row_without_tokens() {
        let opted_out = user(false);
        let d_out = device(opted_out.id, "tok-out", true);
        let active = user(true);
        let d_act = device(active.id, "tok-act", true);
        let mut store = MemoryStore::new(vec![
            (opted_out.clone(), vec![d_out]),
            (active.clone(), vec![d_act]),
        ]);
        let push = ScriptedPush::new(vec![response(vec![ok_result("tok-act", "m1")])]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(push.call_count(), 1);
        assert_eq!(push.tokens_of_call(0), vec!["tok-act".to_string()]);

        assert_eq!(store.saved.len(), 2);
        let row_out = store.saved.iter().find(|r| r.user_id == opted_out.id).unwrap();
        assert_eq!(row_out.notification_status, NotificationStatus::StoredOnly);
        assert!(row_out.device_id.is_none());

        let row_act = store.saved.iter().find(|r| r.user_id == active.id).unwrap();
        assert_eq!(row_act.notification_status, NotificationStatus::Sent);
        assert_eq!(row_act.notification_id, "m1");
    }

    #[tokio::test]
    async fn multi_batch_dispatch_writes_one_row_per_user() {
        let a = user(true);
        let devices_a: Vec<Device> = (0..=MULTICAST_BATCH_SIZE)
            .map(|i| device(a.id, &format!("a-{i}"), true))
            .collect();
        let b = user(true);
        let db = device(b.id, "tok-b", true);
        let mut store = MemoryStore::new(vec![
            (a.clone(), devices_a.clone()),
            (b.clone(), vec![db]),
        ]);

        let batch1: Vec<PushResult> = (0..MULTICAST_BATCH_SIZE)
            .map(|i| ok_result(&format!("a-{i}"), &format!("m-{i}")))
            .collect();
        let batch2 = vec![
            ok_result(&format!("a-{MULTICAST_BATCH_SIZE}"), "m-late"),
            ok_result("tok-b", "m-b"),
        ];
        let push = ScriptedPush::new(vec![response(batch1), response(batch2)]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(push.call_count(), 2);
        assert_eq!(store.saved.len(), 2);

        let row_a = store.saved.iter().find(|r| r.user_id == a.id).unwrap();
        assert_eq!(row_a.notification_id, "m-0");
        assert_eq!(row_a.device_id, Some(devices_a[0].id));

        let row_b = store.saved.iter().find(|r| r.user_id == b.id).unwrap();
        assert_eq!(row_b.notification_id, "m-b");
    }

    #[tokio::test]
    async fn overflow_batch_of_decided_user_is_still_sent() {
        let a = user(true);
        let devices_a: Vec<Device> = (0..=MULTICAST_BATCH_SIZE)
            .map(|i| device(a.id, &format!("a-{i}"), true))
            .collect();
        let mut store = MemoryStore::new(vec![(a.clone(), devices_a.clone())]);

        let batch1: Vec<PushResult> = (0..MULTICAST_BATCH_SIZE)
            .map(|i| ok_result(&format!("a-{i}"), &format!("m-{i}")))
            .collect();
        let batch2 = vec![ok_result(&format!("a-{MULTICAST_BATCH_SIZE}"), "m-late")];
        let push = ScriptedPush::new(vec![response(batch1), response(batch2)]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        // the user is persisted by the first batch, but the overflow device
        // still receives the push
        assert_eq!(push.call_count(), 2);
        assert_eq!(
            push.tokens_of_call(1),
            vec![format!("a-{MULTICAST_BATCH_SIZE}")]
        );
        assert_eq!(store.saved.len(), 1);
        assert_eq!(store.saved[0].notification_id, "m-0");
        assert_eq!(store.saved[0].device_id, Some(devices_a[0].id));
    }

    #[tokio::test]
    async fn failed_batch_does_not_block_later_batches() {
        let a = user(true);
        let devices_a: Vec<Device> = (0..MULTICAST_BATCH_SIZE)
            .map(|i| device(a.id, &format!("a-{i}"), true))
            .collect();
        let b = user(true);
        let db = device(b.id, "tok-b", true);
        let mut store = MemoryStore::new(vec![
            (a.clone(), devices_a),
            (b.clone(), vec![db.clone()]),
        ]);

        let push = ScriptedPush::new(vec![
            provider_error(),
            response(vec![ok_result("tok-b", "m-b")]),
        ]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(push.call_count(), 2);

        let row_a = store.saved.iter().find(|r| r.user_id == a.id).unwrap();
        assert_eq!(row_a.notification_status, NotificationStatus::StoredOnly);

        let row_b = store.saved.iter().find(|r| r.user_id == b.id).unwrap();
        assert_eq!(row_b.notification_status, NotificationStatus::Sent);
        assert_eq!(row_b.notification_id, "m-b");
        assert_eq!(row_b.device_id, Some(db.id));
    }

    #[tokio::test]
    async fn unknown_tokens_in_response_are_ignored() {
        let u = user(true);
        let d = device(u.id, "tok-1", true);
        let mut store = MemoryStore::new(vec![(u, vec![d])]);
        // a success for a token nobody owns must not flip the batch flag
        let push = ScriptedPush::new(vec![response(vec![
            ok_result("stale-tok", "m-x"),
            failed_result("tok-1"),
        ])]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::StoredOnly);
        assert!(row.device_id.is_none());
    }

    #[tokio::test]
    async fn inactive_device_success_is_not_attributed() {
        let u = user(true);
        let d = device(u.id, "tok-1", false);
        let mut store = MemoryStore::new(vec![(u, vec![d])]);
        let push = ScriptedPush::new(vec![response(vec![ok_result("tok-1", "m1")])]);

        dispatch(&mut store, &push, &request()).await.unwrap();

        // the batch flag still flips, but the inactive device is never
        // referenced and the message id is not recorded
        assert_eq!(store.saved.len(), 1);
        let row = &store.saved[0];
        assert_eq!(row.notification_status, NotificationStatus::Sent);
        assert!(row.device_id.is_none());
        assert_ne!(row.notification_id, "m1");
    }

    #[tokio::test]
    async fn null_payload_values_are_dropped() {
        let u = user(true);
        let d = device(u.id, "tok-1", true);
        let mut store = MemoryStore::new(vec![(u, vec![d])]);
        let push = ScriptedPush::new(vec![response(vec![ok_result("tok-1", "m1")])]);

        let mut req = request();
        req.data = Some(serde_json::json!({"a": "1", "b": null, "n": 2}));

        dispatch(&mut store, &push, &req).await.unwrap();

        let row = &store.saved[0];
        assert_eq!(row.data, Some(serde_json::json!({"a": "1", "n": 2})));

        let wire = push.last_message().data;
        assert_eq!(wire.get("a"), Some(&"1".to_string()));
        assert_eq!(wire.get("n"), Some(&"2".to_string()));
        assert!(!wire.contains_key("b"));
    }

    #[tokio::test]
    async fn dispatch_matching_no_users_does_nothing() {
        let mut store = MemoryStore::new(Vec::new());
        let push = ScriptedPush::new(Vec::new());

        let label = dispatch(&mut store, &push, &request()).await.unwrap();

        assert_eq!(label, SENT_LABEL);
        assert_eq!(push.call_count(), 0);
        assert!(store.saved.is_empty());
    }
}

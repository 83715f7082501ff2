use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::store::{LeadStore, StoreError};
use crate::types::{LeadPayload, LeadRecord, NewLead};

const INTERESTS_SEPARATOR: &str = "; ";

/// Effect a reconcile pass had on the store.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Created(LeadRecord),
    Merged(LeadRecord),
    /// Nothing usable survived validation; the store was not touched.
    Skipped,
}

/// Create-or-merge of captured payloads into the lead store.
///
/// Writes against the same email or phone are serialized through per-key
/// locks so two concurrent turns cannot both create a lead for one person.
pub struct Reconciler {
    store: Arc<dyn LeadStore>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store, key_locks: Mutex::new(HashMap::new()) }
    }

    /// Persists a captured payload. The caller's conversational reply must
    /// never depend on this succeeding.
    pub async fn reconcile(
        &self,
        payload: &LeadPayload,
        history_json: &str,
    ) -> Result<ReconcileOutcome, StoreError> {
        let clean = sanitize(payload);
        if clean.is_empty() {
            return Ok(ReconcileOutcome::Skipped);
        }

        let _guards = self.lock_keys(&clean).await;

        let existing = if let Some(email) = &clean.email {
            self.store.find_by_email(email).await?
        } else if let Some(phone) = &clean.phone {
            self.store.find_by_phone(phone).await?
        } else {
            None
        };

        match existing {
            Some(mut record) => {
                merge_into(&mut record, &clean);
                record.conversation = Some(history_json.to_string());
                self.store.update(&record).await?;
                Ok(ReconcileOutcome::Merged(record))
            }
            None => {
                let record = self
                    .store
                    .insert(NewLead {
                        name: clean.name,
                        email: clean.email,
                        phone: clean.phone,
                        interests: clean.interests,
                        conversation: Some(history_json.to_string()),
                    })
                    .await?;
                Ok(ReconcileOutcome::Created(record))
            }
        }
    }

    /// Takes the per-identity locks for this payload, always email key before
    /// phone key so concurrent reconciles cannot deadlock.
    async fn lock_keys(&self, payload: &LeadPayload) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = Vec::new();
        if let Some(email) = &payload.email {
            keys.push(format!("email:{email}"));
        }
        if let Some(phone) = &payload.phone {
            keys.push(format!("phone:{phone}"));
        }

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = {
                let mut locks = self.key_locks.lock().await;
                locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            };
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Drops blank and invalid fields from a payload before it touches the store.
/// A bad value costs only that field, never the whole payload.
fn sanitize(payload: &LeadPayload) -> LeadPayload {
    let mut clean = payload.clone();
    clean.normalize();
    if let Some(email) = &clean.email {
        if !valid_email(email) {
            warn!("dropping invalid email from captured payload: {email:?}");
            clean.email = None;
        }
    }
    if let Some(phone) = &clean.phone {
        if !valid_phone(phone) {
            warn!("dropping invalid phone from captured payload: {phone:?}");
            clean.phone = None;
        }
    }
    clean
}

fn valid_email(value: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

fn valid_phone(value: &str) -> bool {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or("").is_empty()
}

/// First write wins for name, email, and phone; interests accumulate.
fn merge_into(record: &mut LeadRecord, payload: &LeadPayload) {
    if is_blank(&record.name) && payload.name.is_some() {
        record.name = payload.name.clone();
    }
    if is_blank(&record.email) && payload.email.is_some() {
        record.email = payload.email.clone();
    }
    if is_blank(&record.phone) && payload.phone.is_some() {
        record.phone = payload.phone.clone();
    }
    if let Some(incoming) = &payload.interests {
        record.interests = Some(merge_interests(record.interests.as_deref(), incoming));
    }
}

fn merge_interests(existing: Option<&str>, incoming: &str) -> String {
    let Some(existing) = existing.filter(|value| !value.trim().is_empty()) else {
        return incoming.to_string();
    };
    let already_listed = existing
        .split(INTERESTS_SEPARATOR)
        .any(|segment| segment.trim() == incoming);
    if already_listed {
        existing.to_string()
    } else {
        format!("{existing}{INTERESTS_SEPARATOR}{incoming}")
    }
}

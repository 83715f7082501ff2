use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{now_iso, LeadRecord, NewLead};

/// Faults raised by a lead store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<LeadRecord>, StoreError>;
    async fn insert(&self, lead: NewLead) -> Result<LeadRecord, StoreError>;
    async fn update(&self, record: &LeadRecord) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<LeadRecord>, StoreError>;
    async fn get(&self, id: i64) -> Result<Option<LeadRecord>, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short label shown by the health endpoint.
    fn kind(&self) -> &'static str;
}

pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_lead_row(row: &PgRow) -> LeadRecord {
    LeadRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        interests: row.get("interests"),
        created_at: row.get("created_at"),
        conversation: row.get("conversation"),
    }
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, interests, created_at, conversation \
             FROM leads WHERE email = $1 ORDER BY id LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(row.as_ref().map(parse_lead_row))
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<LeadRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, interests, created_at, conversation \
             FROM leads WHERE phone = $1 ORDER BY id LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(row.as_ref().map(parse_lead_row))
    }

    async fn insert(&self, lead: NewLead) -> Result<LeadRecord, StoreError> {
        let row = sqlx::query(
            "INSERT INTO leads (name, email, phone, interests, created_at, conversation) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, name, email, phone, interests, created_at, conversation",
        )
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.interests)
        .bind(now_iso())
        .bind(&lead.conversation)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(parse_lead_row(&row))
    }

    async fn update(&self, record: &LeadRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE leads SET name = $1, email = $2, phone = $3, interests = $4, \
             conversation = $5 WHERE id = $6",
        )
        .bind(&record.name)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(&record.interests)
        .bind(&record.conversation)
        .bind(record.id)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, email, phone, interests, created_at, conversation \
             FROM leads ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(rows.iter().map(parse_lead_row).collect())
    }

    async fn get(&self, id: i64) -> Result<Option<LeadRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, email, phone, interests, created_at, conversation \
             FROM leads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;
        Ok(row.as_ref().map(parse_lead_row))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

/// Volatile store used when no database is configured, and by the tests.
/// Leads live for the lifetime of the process.
#[derive(Default)]
pub struct MemoryLeadStore {
    leads: RwLock<Vec<LeadRecord>>,
    next_id: AtomicI64,
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<LeadRecord>, StoreError> {
        let leads = self.leads.read().await;
        Ok(leads.iter().find(|lead| lead.email.as_deref() == Some(email)).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<LeadRecord>, StoreError> {
        let leads = self.leads.read().await;
        Ok(leads.iter().find(|lead| lead.phone.as_deref() == Some(phone)).cloned())
    }

    async fn insert(&self, lead: NewLead) -> Result<LeadRecord, StoreError> {
        let record = LeadRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: lead.name,
            email: lead.email,
            phone: lead.phone,
            interests: lead.interests,
            created_at: now_iso(),
            conversation: lead.conversation,
        };
        self.leads.write().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, record: &LeadRecord) -> Result<(), StoreError> {
        let mut leads = self.leads.write().await;
        if let Some(slot) = leads.iter_mut().find(|lead| lead.id == record.id) {
            *slot = record.clone();
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LeadRecord>, StoreError> {
        Ok(self.leads.read().await.clone())
    }

    async fn get(&self, id: i64) -> Result<Option<LeadRecord>, StoreError> {
        let leads = self.leads.read().await;
        Ok(leads.iter().find(|lead| lead.id == id).cloned())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "in-memory"
    }
}

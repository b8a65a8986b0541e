//! Store writer for the PRM collections.
//!
//! `PrmStore` is the seam between the sync pipeline and the backing store.
//! `PgStore` talks to Postgres through sqlx; `MemoryStore` backs tests and
//! token-free local runs. Each batched write is exactly one round trip per
//! entity kind, and the whole kind's batch fails together in insert mode.
//!
//! Natural-key uniqueness for upsert (partners.name, deals.name,
//! leads.email) is enforced by the unique constraints `ensure_schema`
//! declares, not by application-side checks.

use async_trait::async_trait;
use chrono::Utc;
use prm_core::{
    Deal, DealRecord, DealStatus, Lead, LeadPriority, LeadRecord, LeadStatus, Partner,
    PartnerRecord, PartnerStatus, Tier,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CRATE_NAME: &str = "prm-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

/// Insert-or-upsert writer plus the read/delete surface the API exposes.
///
/// Upsert fully replaces the mapped fields of an existing row sharing the
/// natural key; it is not a merge, so locally edited values revert to the
/// incoming (defaulted) ones on every sync pass. Duplicate keys within one
/// upsert batch collapse to the last occurrence, and the returned count is
/// the number of distinct keys written.
#[async_trait]
pub trait PrmStore: Send + Sync {
    async fn insert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError>;
    async fn upsert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError>;
    /// Sorted by revenue descending.
    async fn list_partners(&self) -> Result<Vec<PartnerRecord>, StoreError>;
    async fn create_partner(&self, row: Partner) -> Result<PartnerRecord, StoreError>;
    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError>;
    async fn upsert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError>;
    /// Sorted by date descending.
    async fn list_deals(&self) -> Result<Vec<DealRecord>, StoreError>;
    async fn create_deal(&self, row: Deal) -> Result<DealRecord, StoreError>;
    async fn delete_deal(&self, id: Uuid) -> Result<(), StoreError>;

    async fn insert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError>;
    async fn upsert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError>;
    /// Sorted by date descending.
    async fn list_leads(&self) -> Result<Vec<LeadRecord>, StoreError>;
    async fn create_lead(&self, row: Lead) -> Result<LeadRecord, StoreError>;
    async fn delete_lead(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Portal branding configuration, persisted behind a swappable key-value
/// abstraction instead of browser-local mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortalSettings {
    pub company_name: String,
    pub logo: String,
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            company_name: "Partner Portal".to_string(),
            logo: String::new(),
            primary_color: "#4F46E5".to_string(),
            secondary_color: "#10B981".to_string(),
            accent_color: "#F59E0B".to_string(),
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the defaults when nothing has been saved yet.
    async fn load(&self) -> Result<PortalSettings, StoreError>;
    async fn save(&self, settings: &PortalSettings) -> Result<(), StoreError>;
    async fn reset(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    partners: Vec<PartnerRecord>,
    deals: Vec<DealRecord>,
    leads: Vec<LeadRecord>,
}

/// In-memory store used by tests and by `serve` runs without a DATABASE_URL.
/// Insert mode performs no uniqueness checks, so re-running a migration
/// duplicates every row, matching insert semantics against an unconstrained
/// collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Collapses a batch to the last occurrence per natural key. Postgres
/// rejects an `ON CONFLICT DO UPDATE` that touches the same row twice in one
/// statement, so duplicate keys within a batch resolve last-writer-wins
/// before the query is built; the in-memory store applies the same rule so
/// both report the same written count.
fn dedup_last_by_key<T: Clone, K: Eq + std::hash::Hash>(
    rows: &[T],
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<T> = rows
        .iter()
        .rev()
        .filter(|row| seen.insert(key(row)))
        .cloned()
        .collect();
    out.reverse();
    out
}

fn record_partner(row: Partner) -> PartnerRecord {
    PartnerRecord {
        id: Uuid::new_v4(),
        partner: row,
        created_at: Utc::now(),
    }
}

fn record_deal(row: Deal) -> DealRecord {
    DealRecord {
        id: Uuid::new_v4(),
        deal: row,
        created_at: Utc::now(),
    }
}

fn record_lead(row: Lead) -> LeadRecord {
    LeadRecord {
        id: Uuid::new_v4(),
        lead: row,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl PrmStore for MemoryStore {
    async fn insert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.partners.extend(rows.iter().cloned().map(record_partner));
        Ok(rows.len())
    }

    async fn upsert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError> {
        let rows = dedup_last_by_key(rows, |r| r.name.clone());
        let mut inner = self.inner.lock().await;
        for row in &rows {
            match inner.partners.iter_mut().find(|r| r.partner.name == row.name) {
                // Full replacement, not a merge; last writer wins.
                Some(existing) => existing.partner = row.clone(),
                None => inner.partners.push(record_partner(row.clone())),
            }
        }
        Ok(rows.len())
    }

    async fn list_partners(&self) -> Result<Vec<PartnerRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out = inner.partners.clone();
        out.sort_by(|a, b| {
            b.partner
                .revenue
                .partial_cmp(&a.partner.revenue)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(out)
    }

    async fn create_partner(&self, row: Partner) -> Result<PartnerRecord, StoreError> {
        let record = record_partner(row);
        self.inner.lock().await.partners.push(record.clone());
        Ok(record)
    }

    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().await.partners.retain(|r| r.id != id);
        Ok(())
    }

    async fn insert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.deals.extend(rows.iter().cloned().map(record_deal));
        Ok(rows.len())
    }

    async fn upsert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError> {
        let rows = dedup_last_by_key(rows, |r| r.name.clone());
        let mut inner = self.inner.lock().await;
        for row in &rows {
            match inner.deals.iter_mut().find(|r| r.deal.name == row.name) {
                Some(existing) => existing.deal = row.clone(),
                None => inner.deals.push(record_deal(row.clone())),
            }
        }
        Ok(rows.len())
    }

    async fn list_deals(&self) -> Result<Vec<DealRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out = inner.deals.clone();
        out.sort_by(|a, b| b.deal.date.cmp(&a.deal.date));
        Ok(out)
    }

    async fn create_deal(&self, row: Deal) -> Result<DealRecord, StoreError> {
        let record = record_deal(row);
        self.inner.lock().await.deals.push(record.clone());
        Ok(record)
    }

    async fn delete_deal(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().await.deals.retain(|r| r.id != id);
        Ok(())
    }

    async fn insert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.leads.extend(rows.iter().cloned().map(record_lead));
        Ok(rows.len())
    }

    async fn upsert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError> {
        let rows = dedup_last_by_key(rows, |r| r.email.clone());
        let mut inner = self.inner.lock().await;
        for row in &rows {
            match inner.leads.iter_mut().find(|r| r.lead.email == row.email) {
                Some(existing) => existing.lead = row.clone(),
                None => inner.leads.push(record_lead(row.clone())),
            }
        }
        Ok(rows.len())
    }

    async fn list_leads(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let mut out = inner.leads.clone();
        out.sort_by(|a, b| b.lead.date.cmp(&a.lead.date));
        Ok(out)
    }

    async fn create_lead(&self, row: Lead) -> Result<LeadRecord, StoreError> {
        let record = record_lead(row);
        self.inner.lock().await.leads.push(record.clone());
        Ok(record)
    }

    async fn delete_lead(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().await.leads.retain(|r| r.id != id);
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partners (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    tier TEXT NOT NULL DEFAULT 'Bronze',
    contact TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'Active',
    revenue DOUBLE PRECISION NOT NULL DEFAULT 0,
    deals BIGINT NOT NULL DEFAULT 0,
    growth DOUBLE PRECISION NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS deals (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    company TEXT NOT NULL DEFAULT 'Unknown',
    value DOUBLE PRECISION NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'Pending',
    partner TEXT,
    date DATE NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS leads (
    id UUID PRIMARY KEY,
    company TEXT NOT NULL,
    contact TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL UNIQUE,
    phone TEXT NOT NULL DEFAULT '',
    value DOUBLE PRECISION NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'New',
    priority TEXT NOT NULL DEFAULT 'Medium',
    date DATE NOT NULL,
    notes TEXT,
    assigned_to TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS portal_settings (
    key TEXT PRIMARY KEY,
    value JSONB NOT NULL
);
"#;

/// Creates the tables and the natural-key unique constraints when they do
/// not exist yet. Idempotent; runs on startup before any write path.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    tracing::debug!("database schema ensured");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            pool: PgPool::connect(database_url).await?,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn partner_values<'a>(
        qb: &mut QueryBuilder<'a, sqlx::Postgres>,
        rows: &'a [Partner],
    ) {
        let now = Utc::now();
        qb.push_values(rows, |mut b, row| {
            b.push_bind(Uuid::new_v4())
                .push_bind(&row.name)
                .push_bind(row.tier.as_str())
                .push_bind(&row.contact)
                .push_bind(&row.phone)
                .push_bind(row.status.as_str())
                .push_bind(row.revenue)
                .push_bind(row.deals)
                .push_bind(row.growth)
                .push_bind(now);
        });
    }

    fn deal_values<'a>(qb: &mut QueryBuilder<'a, sqlx::Postgres>, rows: &'a [Deal]) {
        let now = Utc::now();
        qb.push_values(rows, |mut b, row| {
            b.push_bind(Uuid::new_v4())
                .push_bind(&row.name)
                .push_bind(&row.company)
                .push_bind(row.value)
                .push_bind(row.status.as_str())
                .push_bind(&row.partner)
                .push_bind(row.date)
                .push_bind(&row.description)
                .push_bind(now);
        });
    }

    fn lead_values<'a>(qb: &mut QueryBuilder<'a, sqlx::Postgres>, rows: &'a [Lead]) {
        let now = Utc::now();
        qb.push_values(rows, |mut b, row| {
            b.push_bind(Uuid::new_v4())
                .push_bind(&row.company)
                .push_bind(&row.contact)
                .push_bind(&row.email)
                .push_bind(&row.phone)
                .push_bind(row.value)
                .push_bind(row.status.as_str())
                .push_bind(row.priority.as_str())
                .push_bind(row.date)
                .push_bind(&row.notes)
                .push_bind(&row.assigned_to)
                .push_bind(now);
        });
    }

    async fn write_partners(&self, rows: &[Partner], upsert: bool) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let deduped;
        let rows = if upsert {
            deduped = dedup_last_by_key(rows, |r| r.name.clone());
            deduped.as_slice()
        } else {
            rows
        };
        let mut qb = QueryBuilder::new(
            "INSERT INTO partners (id, name, tier, contact, phone, status, revenue, deals, growth, created_at) ",
        );
        Self::partner_values(&mut qb, rows);
        if upsert {
            qb.push(
                " ON CONFLICT (name) DO UPDATE SET \
                 tier = EXCLUDED.tier, contact = EXCLUDED.contact, phone = EXCLUDED.phone, \
                 status = EXCLUDED.status, revenue = EXCLUDED.revenue, deals = EXCLUDED.deals, \
                 growth = EXCLUDED.growth",
            );
        }
        let result = qb.build().execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), upsert, "wrote partners");
        Ok(result.rows_affected() as usize)
    }

    async fn write_deals(&self, rows: &[Deal], upsert: bool) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let deduped;
        let rows = if upsert {
            deduped = dedup_last_by_key(rows, |r| r.name.clone());
            deduped.as_slice()
        } else {
            rows
        };
        let mut qb = QueryBuilder::new(
            "INSERT INTO deals (id, name, company, value, status, partner, date, description, created_at) ",
        );
        Self::deal_values(&mut qb, rows);
        if upsert {
            qb.push(
                " ON CONFLICT (name) DO UPDATE SET \
                 company = EXCLUDED.company, value = EXCLUDED.value, status = EXCLUDED.status, \
                 partner = EXCLUDED.partner, date = EXCLUDED.date, description = EXCLUDED.description",
            );
        }
        let result = qb.build().execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), upsert, "wrote deals");
        Ok(result.rows_affected() as usize)
    }

    async fn write_leads(&self, rows: &[Lead], upsert: bool) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let deduped;
        let rows = if upsert {
            deduped = dedup_last_by_key(rows, |r| r.email.clone());
            deduped.as_slice()
        } else {
            rows
        };
        let mut qb = QueryBuilder::new(
            "INSERT INTO leads (id, company, contact, email, phone, value, status, priority, date, notes, assigned_to, created_at) ",
        );
        Self::lead_values(&mut qb, rows);
        if upsert {
            qb.push(
                " ON CONFLICT (email) DO UPDATE SET \
                 company = EXCLUDED.company, contact = EXCLUDED.contact, phone = EXCLUDED.phone, \
                 value = EXCLUDED.value, status = EXCLUDED.status, priority = EXCLUDED.priority, \
                 date = EXCLUDED.date, notes = EXCLUDED.notes, assigned_to = EXCLUDED.assigned_to",
            );
        }
        let result = qb.build().execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), upsert, "wrote leads");
        Ok(result.rows_affected() as usize)
    }
}

fn partner_from_row(row: &sqlx::postgres::PgRow) -> Result<PartnerRecord, sqlx::Error> {
    let tier: String = row.try_get("tier")?;
    let status: String = row.try_get("status")?;
    Ok(PartnerRecord {
        id: row.try_get("id")?,
        partner: Partner {
            name: row.try_get("name")?,
            tier: Tier::parse(&tier).unwrap_or_default(),
            contact: row.try_get("contact")?,
            phone: row.try_get("phone")?,
            status: PartnerStatus::parse(&status).unwrap_or_default(),
            revenue: row.try_get("revenue")?,
            deals: row.try_get("deals")?,
            growth: row.try_get("growth")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn deal_from_row(row: &sqlx::postgres::PgRow) -> Result<DealRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(DealRecord {
        id: row.try_get("id")?,
        deal: Deal {
            name: row.try_get("name")?,
            company: row.try_get("company")?,
            value: row.try_get("value")?,
            status: DealStatus::parse(&status).unwrap_or_default(),
            partner: row.try_get("partner")?,
            date: row.try_get("date")?,
            description: row.try_get("description")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

fn lead_from_row(row: &sqlx::postgres::PgRow) -> Result<LeadRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    Ok(LeadRecord {
        id: row.try_get("id")?,
        lead: Lead {
            company: row.try_get("company")?,
            contact: row.try_get("contact")?,
            email: row.try_get("email")?,
            phone: row.try_get("phone")?,
            value: row.try_get("value")?,
            status: LeadStatus::parse(&status).unwrap_or_default(),
            priority: LeadPriority::parse(&priority).unwrap_or_default(),
            date: row.try_get("date")?,
            notes: row.try_get("notes")?,
            assigned_to: row.try_get("assigned_to")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PrmStore for PgStore {
    async fn insert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError> {
        self.write_partners(rows, false).await
    }

    async fn upsert_partners(&self, rows: &[Partner]) -> Result<usize, StoreError> {
        self.write_partners(rows, true).await
    }

    async fn list_partners(&self) -> Result<Vec<PartnerRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, tier, contact, phone, status, revenue, deals, growth, created_at \
             FROM partners ORDER BY revenue DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| partner_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn create_partner(&self, row: Partner) -> Result<PartnerRecord, StoreError> {
        let record = record_partner(row);
        sqlx::query(
            "INSERT INTO partners (id, name, tier, contact, phone, status, revenue, deals, growth, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(record.id)
        .bind(&record.partner.name)
        .bind(record.partner.tier.as_str())
        .bind(&record.partner.contact)
        .bind(&record.partner.phone)
        .bind(record.partner.status.as_str())
        .bind(record.partner.revenue)
        .bind(record.partner.deals)
        .bind(record.partner.growth)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_partner(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM partners WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError> {
        self.write_deals(rows, false).await
    }

    async fn upsert_deals(&self, rows: &[Deal]) -> Result<usize, StoreError> {
        self.write_deals(rows, true).await
    }

    async fn list_deals(&self) -> Result<Vec<DealRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, company, value, status, partner, date, description, created_at \
             FROM deals ORDER BY date DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| deal_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn create_deal(&self, row: Deal) -> Result<DealRecord, StoreError> {
        let record = record_deal(row);
        sqlx::query(
            "INSERT INTO deals (id, name, company, value, status, partner, date, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(&record.deal.name)
        .bind(&record.deal.company)
        .bind(record.deal.value)
        .bind(record.deal.status.as_str())
        .bind(&record.deal.partner)
        .bind(record.deal.date)
        .bind(&record.deal.description)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_deal(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM deals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError> {
        self.write_leads(rows, false).await
    }

    async fn upsert_leads(&self, rows: &[Lead]) -> Result<usize, StoreError> {
        self.write_leads(rows, true).await
    }

    async fn list_leads(&self) -> Result<Vec<LeadRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, company, contact, email, phone, value, status, priority, date, notes, assigned_to, created_at \
             FROM leads ORDER BY date DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| lead_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn create_lead(&self, row: Lead) -> Result<LeadRecord, StoreError> {
        let record = record_lead(row);
        sqlx::query(
            "INSERT INTO leads (id, company, contact, email, phone, value, status, priority, date, notes, assigned_to, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(record.id)
        .bind(&record.lead.company)
        .bind(&record.lead.contact)
        .bind(&record.lead.email)
        .bind(&record.lead.phone)
        .bind(record.lead.value)
        .bind(record.lead.status.as_str())
        .bind(record.lead.priority.as_str())
        .bind(record.lead.date)
        .bind(&record.lead.notes)
        .bind(&record.lead.assigned_to)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_lead(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM leads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Settings kept in process memory; used by tests and DB-less serve runs.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<Option<PortalSettings>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn load(&self) -> Result<PortalSettings, StoreError> {
        Ok(self.inner.lock().await.clone().unwrap_or_default())
    }

    async fn save(&self, settings: &PortalSettings) -> Result<(), StoreError> {
        *self.inner.lock().await = Some(settings.clone());
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        *self.inner.lock().await = None;
        Ok(())
    }
}

const SETTINGS_KEY: &str = "portal";

/// Settings row in the `portal_settings` key-value table.
#[derive(Debug, Clone)]
pub struct PgSettings {
    pool: PgPool,
}

impl PgSettings {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettings {
    async fn load(&self) -> Result<PortalSettings, StoreError> {
        let row = sqlx::query("SELECT value FROM portal_settings WHERE key = $1")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row.try_get("value")?;
                serde_json::from_value(value)
                    .map_err(|err| StoreError::Message(format!("corrupt portal settings: {err}")))
            }
            None => Ok(PortalSettings::default()),
        }
    }

    async fn save(&self, settings: &PortalSettings) -> Result<(), StoreError> {
        let value = serde_json::to_value(settings)
            .map_err(|err| StoreError::Message(format!("serializing portal settings: {err}")))?;
        sqlx::query(
            "INSERT INTO portal_settings (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(SETTINGS_KEY)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM portal_settings WHERE key = $1")
            .bind(SETTINGS_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn partner(name: &str, revenue: f64) -> Partner {
        Partner {
            name: name.to_string(),
            tier: Tier::Bronze,
            contact: String::new(),
            phone: String::new(),
            status: PartnerStatus::Active,
            revenue,
            deals: 0,
            growth: 0.0,
        }
    }

    fn lead(email: &str, date: NaiveDate) -> Lead {
        Lead {
            company: "Acme".to_string(),
            contact: "Unknown".to_string(),
            email: email.to_string(),
            phone: String::new(),
            value: 0.0,
            status: LeadStatus::New,
            priority: LeadPriority::Medium,
            date,
            notes: None,
            assigned_to: None,
        }
    }

    #[tokio::test]
    async fn insert_appends_without_deduplication() {
        let store = MemoryStore::new();
        let rows = vec![partner("Acme", 0.0), partner("Globex", 0.0)];
        assert_eq!(store.insert_partners(&rows).await.unwrap(), 2);
        assert_eq!(store.insert_partners(&rows).await.unwrap(), 2);
        assert_eq!(store.list_partners().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn upsert_replaces_by_name_and_keeps_the_row_id() {
        let store = MemoryStore::new();
        store.upsert_partners(&[partner("Acme", 100.0)]).await.unwrap();
        let before = store.list_partners().await.unwrap();

        store.upsert_partners(&[partner("Acme", 0.0)]).await.unwrap();
        let after = store.list_partners().await.unwrap();

        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, before[0].id);
        // Upsert is a full replacement: the locally held revenue is gone.
        assert_eq!(after[0].partner.revenue, 0.0);
    }

    #[tokio::test]
    async fn upsert_batch_with_duplicate_keys_keeps_the_last_occurrence() {
        let store = MemoryStore::new();
        let written = store
            .upsert_partners(&[partner("Acme", 100.0), partner("Acme", 250.0)])
            .await
            .unwrap();
        assert_eq!(written, 1);
        let rows = store.list_partners().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].partner.revenue, 250.0);

        // Two email-less leads in one batch share the empty natural key and
        // collapse the same way instead of failing the whole kind.
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let written = store.upsert_leads(&[lead("", d), lead("", d)]).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.list_leads().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn partners_list_sorted_by_revenue_descending() {
        let store = MemoryStore::new();
        store
            .insert_partners(&[partner("Low", 10.0), partner("High", 500.0), partner("Mid", 50.0)])
            .await
            .unwrap();
        let names: Vec<_> = store
            .list_partners()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.partner.name)
            .collect();
        assert_eq!(names, vec!["High", "Mid", "Low"]);
    }

    #[tokio::test]
    async fn leads_upsert_by_email_collides_on_empty_email() {
        let store = MemoryStore::new();
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        store
            .upsert_leads(&[lead("", d), lead("a@b.com", d)])
            .await
            .unwrap();
        // A second anonymous lead overwrites the first; this is the known
        // empty-email collision hazard, not a feature.
        store.upsert_leads(&[lead("", d)]).await.unwrap();
        assert_eq!(store.list_leads().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_only_the_targeted_row() {
        let store = MemoryStore::new();
        let kept = store.create_partner(partner("Keep", 1.0)).await.unwrap();
        let gone = store.create_partner(partner("Gone", 2.0)).await.unwrap();
        store.delete_partner(gone.id).await.unwrap();
        let remaining = store.list_partners().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept.id);
    }

    #[tokio::test]
    async fn settings_round_trip_and_reset_to_defaults() {
        let store = MemorySettings::new();
        assert_eq!(store.load().await.unwrap(), PortalSettings::default());

        let custom = PortalSettings {
            company_name: "Handshake".to_string(),
            ..PortalSettings::default()
        };
        store.save(&custom).await.unwrap();
        assert_eq!(store.load().await.unwrap(), custom);

        store.reset().await.unwrap();
        assert_eq!(store.load().await.unwrap(), PortalSettings::default());
    }
}

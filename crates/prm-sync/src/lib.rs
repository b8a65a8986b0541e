//! Migration and sync orchestration for the CRM pipeline.
//!
//! Both orchestrators run the same shape: fetch the three entity kinds from
//! the CRM concurrently, map them, then write them sequentially. Migration
//! writes in insert mode (re-running it duplicates rows); sync writes in
//! upsert mode keyed by the natural key per kind and is safe to re-run.
//! A failed kind contributes a zero count and one error string without
//! blocking its siblings.

use chrono::{NaiveDate, Utc};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use prm_core::{
    Deal, DealRecord, DealStatus, Lead, LeadPriority, LeadStatus, Partner, PartnerRecord,
    PartnerStatus, Tier,
};
use prm_hubspot::{
    map_company, map_contact, map_deal, map_webhook_contact, map_webhook_deal, parse_amount,
    CrmReader, RawContact, RawDeal,
};
use prm_storage::{PrmStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "prm-sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub partners: usize,
    pub deals: usize,
    pub leads: usize,
    pub total: usize,
}

/// Aggregate result of one migration or sync pass. A fully failed pass still
/// yields an outcome (zero counts, populated errors); orchestration never
/// propagates upstream failures as errors of its own.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub counts: ImportCounts,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Upsert,
}

/// One-time bulk import, insert mode. Not idempotent: the store performs no
/// natural-key deduplication on insert, so a second run duplicates records
/// (or surfaces constraint errors where the store enforces uniqueness).
pub async fn run_migration(crm: &dyn CrmReader, store: &dyn PrmStore) -> ImportOutcome {
    info!("starting full CRM migration");
    let outcome = run_import(crm, store, WriteMode::Insert).await;
    info!(
        partners = outcome.counts.partners,
        deals = outcome.counts.deals,
        leads = outcome.counts.leads,
        errors = outcome.errors.len(),
        "migration complete"
    );
    outcome
}

/// Recurring reconciliation, upsert mode keyed by name (partners, deals) or
/// email (leads). Re-running with identical CRM data leaves the row count
/// unchanged. Upsert fully replaces mapped fields, so locally edited values
/// (revenue, deal counts, growth) revert to defaults on every pass.
pub async fn run_sync(crm: &dyn CrmReader, store: &dyn PrmStore) -> ImportOutcome {
    info!("starting CRM sync");
    let outcome = run_import(crm, store, WriteMode::Upsert).await;
    info!(
        partners = outcome.counts.partners,
        deals = outcome.counts.deals,
        leads = outcome.counts.leads,
        errors = outcome.errors.len(),
        "sync complete"
    );
    outcome
}

async fn run_import(crm: &dyn CrmReader, store: &dyn PrmStore, mode: WriteMode) -> ImportOutcome {
    let today = Utc::now().date_naive();
    let mut outcome = ImportOutcome::default();

    // The three reads overlap; writes below stay sequential.
    let (companies, deals, contacts) =
        tokio::join!(crm.list_companies(), crm.list_deals(), crm.list_contacts());

    match companies {
        Ok(raw) => {
            let rows: Vec<Partner> = raw.iter().map(map_company).collect();
            let written = match mode {
                WriteMode::Insert => store.insert_partners(&rows).await,
                WriteMode::Upsert => store.upsert_partners(&rows).await,
            };
            match written {
                Ok(count) => outcome.counts.partners = count,
                Err(err) => {
                    warn!(%err, "partners write failed");
                    outcome.errors.push(format!("Partners: {err}"));
                }
            }
        }
        Err(err) => {
            warn!(%err, "companies fetch failed");
            outcome.errors.push(format!("Partners: {err}"));
        }
    }

    match deals {
        Ok(raw) => {
            let rows: Vec<Deal> = raw.iter().map(|d| map_deal(d, today)).collect();
            let written = match mode {
                WriteMode::Insert => store.insert_deals(&rows).await,
                WriteMode::Upsert => store.upsert_deals(&rows).await,
            };
            match written {
                Ok(count) => outcome.counts.deals = count,
                Err(err) => {
                    warn!(%err, "deals write failed");
                    outcome.errors.push(format!("Deals: {err}"));
                }
            }
        }
        Err(err) => {
            warn!(%err, "deals fetch failed");
            outcome.errors.push(format!("Deals: {err}"));
        }
    }

    match contacts {
        Ok(raw) => {
            let rows: Vec<Lead> = raw.iter().map(|c| map_contact(c, today)).collect();
            let written = match mode {
                WriteMode::Insert => store.insert_leads(&rows).await,
                WriteMode::Upsert => store.upsert_leads(&rows).await,
            };
            match written {
                Ok(count) => outcome.counts.leads = count,
                Err(err) => {
                    warn!(%err, "leads write failed");
                    outcome.errors.push(format!("Leads: {err}"));
                }
            }
        }
        Err(err) => {
            warn!(%err, "contacts fetch failed");
            outcome.errors.push(format!("Leads: {err}"));
        }
    }

    outcome.counts.total =
        outcome.counts.partners + outcome.counts.deals + outcome.counts.leads;
    outcome
}

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The CRM pushes an array with exactly one element; an empty payload is
    /// rejected before any store mutation.
    #[error("empty webhook payload")]
    EmptyPayload,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ingests one pushed deal as a single new row. The payload is an array of
/// CRM-native records, properties nested under their `properties` envelope
/// exactly as in the listing API. Inserts, never upserts: redelivery of the
/// same external event creates a duplicate row (no idempotency key exists in
/// the payload).
pub async fn ingest_deal_webhook(
    store: &dyn PrmStore,
    payload: &[RawDeal],
) -> Result<DealRecord, WebhookError> {
    let raw = payload.first().ok_or(WebhookError::EmptyPayload)?;
    let deal = map_webhook_deal(raw, Utc::now().date_naive());
    info!(name = %deal.name, "ingesting deal webhook");
    Ok(store.create_deal(deal).await?)
}

/// Ingests one pushed contact as a single new partner row.
pub async fn ingest_contact_webhook(
    store: &dyn PrmStore,
    payload: &[RawContact],
) -> Result<PartnerRecord, WebhookError> {
    let raw = payload.first().ok_or(WebhookError::EmptyPayload)?;
    let partner = map_webhook_contact(raw);
    info!(name = %partner.name, "ingesting contact webhook");
    Ok(store.create_partner(partner).await?)
}

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Returns the first non-empty value among the candidate column names.
/// HubSpot exports vary between display headings and raw property names, so
/// every field probes both spellings.
fn csv_field(headers: &csv::StringRecord, record: &csv::StringRecord, names: &[&str]) -> String {
    for name in names {
        if let Some(index) = headers.iter().position(|h| h == *name) {
            if let Some(value) = record.get(index) {
                let value = value.trim();
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
    }
    String::new()
}

fn csv_records(text: &str) -> Result<(csv::StringRecord, Vec<csv::StringRecord>), CsvError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().any(|field| !field.trim().is_empty()) {
            records.push(record);
        }
    }
    Ok((headers, records))
}

/// HubSpot companies export -> partners, same defaulting contract as the API
/// mapper (tier forced Bronze, performance numbers reset).
pub fn parse_partners_csv(text: &str) -> Result<Vec<Partner>, CsvError> {
    let (headers, records) = csv_records(text)?;
    Ok(records
        .iter()
        .map(|record| {
            let name = csv_field(&headers, record, &["Name", "Company name", "name"]);
            Partner {
                name: if name.is_empty() { "Unknown".to_string() } else { name },
                tier: Tier::Bronze,
                contact: csv_field(&headers, record, &["Company domain name", "Domain", "email"]),
                phone: csv_field(&headers, record, &["Phone Number", "Phone"]),
                status: PartnerStatus::Active,
                revenue: 0.0,
                deals: 0,
                growth: 0.0,
            }
        })
        .collect())
}

/// HubSpot deals export -> deals. Stage information is not part of the
/// export, so status is forced to Pending and the date to `today`.
pub fn parse_deals_csv(text: &str, today: NaiveDate) -> Result<Vec<Deal>, CsvError> {
    let (headers, records) = csv_records(text)?;
    Ok(records
        .iter()
        .map(|record| {
            let name = csv_field(&headers, record, &["Deal Name", "dealname"]);
            let company = csv_field(&headers, record, &["Company name", "company"]);
            let amount = csv_field(&headers, record, &["Amount", "amount"]);
            Deal {
                name: if name.is_empty() { "Untitled".to_string() } else { name },
                company: if company.is_empty() { "Unknown".to_string() } else { company },
                value: parse_amount(Some(amount.as_str())),
                status: DealStatus::Pending,
                partner: None,
                date: today,
                description: None,
            }
        })
        .collect())
}

/// HubSpot contacts export -> leads.
pub fn parse_leads_csv(text: &str, today: NaiveDate) -> Result<Vec<Lead>, CsvError> {
    let (headers, records) = csv_records(text)?;
    Ok(records
        .iter()
        .map(|record| {
            let first = csv_field(&headers, record, &["First Name"]);
            let last = csv_field(&headers, record, &["Last Name"]);
            let email = csv_field(&headers, record, &["Email", "email"]);
            let company = csv_field(&headers, record, &["Company name", "company"]);
            let display = format!("{first} {last}").trim().to_string();
            let contact = if display.is_empty() {
                if email.is_empty() { "Unknown".to_string() } else { email.clone() }
            } else {
                display
            };
            Lead {
                company: if company.is_empty() { "Unknown".to_string() } else { company },
                contact,
                email,
                phone: csv_field(&headers, record, &["Phone Number", "phone"]),
                value: 0.0,
                status: LeadStatus::New,
                priority: LeadPriority::Medium,
                date: today,
                notes: None,
                assigned_to: None,
            }
        })
        .collect())
}

fn write_csv<T: Serialize>(rows: &[T]) -> Result<String, CsvError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| CsvError::Csv(err.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn export_partners_csv(rows: &[Partner]) -> Result<String, CsvError> {
    write_csv(rows)
}

pub fn export_deals_csv(rows: &[Deal]) -> Result<String, CsvError> {
    write_csv(rows)
}

pub fn export_leads_csv(rows: &[Lead]) -> Result<String, CsvError> {
    write_csv(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prm_hubspot::{CompanyProperties, ContactProperties, CrmError, DealProperties, RawCompany};
    use prm_storage::MemoryStore;

    /// Canned CRM reader: each kind either yields fixed records or fails.
    struct StubCrm {
        companies: Result<Vec<RawCompany>, String>,
        deals: Result<Vec<RawDeal>, String>,
        contacts: Result<Vec<RawContact>, String>,
    }

    fn fail(message: &str) -> CrmError {
        CrmError::HttpStatus {
            status: 500,
            url: format!("https://crm.test/{message}"),
        }
    }

    #[async_trait]
    impl CrmReader for StubCrm {
        async fn list_companies(&self) -> Result<Vec<RawCompany>, CrmError> {
            self.companies.clone().map_err(|m| fail(&m))
        }

        async fn list_deals(&self) -> Result<Vec<RawDeal>, CrmError> {
            self.deals.clone().map_err(|m| fail(&m))
        }

        async fn list_contacts(&self) -> Result<Vec<RawContact>, CrmError> {
            self.contacts.clone().map_err(|m| fail(&m))
        }
    }

    fn company(name: &str) -> RawCompany {
        RawCompany {
            id: None,
            properties: CompanyProperties {
                name: Some(name.to_string()),
                domain: Some(format!("{}.com", name.to_lowercase())),
                phone: None,
            },
        }
    }

    fn deal(name: &str, stage: &str) -> RawDeal {
        RawDeal {
            id: None,
            properties: DealProperties {
                dealname: Some(name.to_string()),
                amount: Some("100".to_string()),
                dealstage: Some(stage.to_string()),
                closedate: Some("2024-01-01".to_string()),
                ..Default::default()
            },
        }
    }

    fn contact(email: &str) -> RawContact {
        RawContact {
            id: None,
            properties: ContactProperties {
                firstname: Some("Jane".to_string()),
                lastname: Some("Doe".to_string()),
                email: Some(email.to_string()),
                ..Default::default()
            },
        }
    }

    fn healthy_crm() -> StubCrm {
        StubCrm {
            companies: Ok(vec![company("Acme"), company("Globex")]),
            deals: Ok(vec![deal("Acme Deal", "closedwon")]),
            contacts: Ok(vec![contact("jane@acme.com")]),
        }
    }

    #[tokio::test]
    async fn migration_reports_per_kind_counts_and_total() {
        let store = MemoryStore::new();
        let outcome = run_migration(&healthy_crm(), &store).await;
        assert_eq!(outcome.counts.partners, 2);
        assert_eq!(outcome.counts.deals, 1);
        assert_eq!(outcome.counts.leads, 1);
        assert_eq!(outcome.counts.total, 4);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn failed_deals_fetch_does_not_block_partners_or_leads() {
        let crm = StubCrm {
            deals: Err("deals-down".to_string()),
            ..healthy_crm()
        };
        let store = MemoryStore::new();
        let outcome = run_migration(&crm, &store).await;

        assert_eq!(outcome.counts.partners, 2);
        assert_eq!(outcome.counts.deals, 0);
        assert_eq!(outcome.counts.leads, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Deals:"), "{:?}", outcome.errors);
    }

    #[tokio::test]
    async fn sync_twice_is_idempotent_while_migration_twice_duplicates() {
        let store = MemoryStore::new();
        run_sync(&healthy_crm(), &store).await;
        run_sync(&healthy_crm(), &store).await;
        assert_eq!(store.list_partners().await.unwrap().len(), 2);
        assert_eq!(store.list_deals().await.unwrap().len(), 1);
        assert_eq!(store.list_leads().await.unwrap().len(), 1);

        let insert_store = MemoryStore::new();
        run_migration(&healthy_crm(), &insert_store).await;
        run_migration(&healthy_crm(), &insert_store).await;
        assert_eq!(insert_store.list_partners().await.unwrap().len(), 4);
        assert_eq!(insert_store.list_deals().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sync_silently_resets_locally_edited_fields() {
        // Known design gap, not intended behavior: upsert writes full
        // migration defaults, so a locally maintained revenue figure is lost
        // on the next pass.
        let store = MemoryStore::new();
        run_sync(&healthy_crm(), &store).await;

        let mut acme = store
            .list_partners()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.partner.name == "Acme")
            .unwrap()
            .partner;
        acme.revenue = 250_000.0;
        acme.tier = Tier::Gold;
        store.upsert_partners(&[acme]).await.unwrap();

        run_sync(&healthy_crm(), &store).await;
        let acme_after = store
            .list_partners()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.partner.name == "Acme")
            .unwrap();
        assert_eq!(acme_after.partner.revenue, 0.0);
        assert_eq!(acme_after.partner.tier, Tier::Bronze);
    }

    #[tokio::test]
    async fn webhook_rejects_empty_payload_without_mutation() {
        let store = MemoryStore::new();
        let result = ingest_deal_webhook(&store, &[]).await;
        assert!(matches!(result, Err(WebhookError::EmptyPayload)));
        assert!(store.list_deals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_redelivery_duplicates_rows() {
        // At-least-once delivery with no dedup key; documented hazard.
        let store = MemoryStore::new();
        let payload = vec![deal("Acme Deal", "closedwon")];
        ingest_deal_webhook(&store, &payload).await.unwrap();
        ingest_deal_webhook(&store, &payload).await.unwrap();
        assert_eq!(store.list_deals().await.unwrap().len(), 2);
    }

    #[test]
    fn partners_csv_probes_both_header_spellings() {
        let text = "Name,Company domain name,Phone Number\nAcme,acme.com,555-0100\n,,\n";
        let rows = parse_partners_csv(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Acme");
        assert_eq!(rows[0].contact, "acme.com");
        assert_eq!(rows[0].tier, Tier::Bronze);

        let raw = "name,Domain\nGlobex,globex.com\n";
        let rows = parse_partners_csv(raw).unwrap();
        assert_eq!(rows[0].name, "Globex");
        assert_eq!(rows[0].contact, "globex.com");
    }

    #[test]
    fn deals_csv_forces_pending_and_parses_amounts() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let text = "Deal Name,Amount\nBig Deal,1500.50\nNo Amount,\n";
        let rows = parse_deals_csv(text, today).unwrap();
        assert_eq!(rows[0].value, 1500.5);
        assert_eq!(rows[0].status, DealStatus::Pending);
        assert_eq!(rows[1].value, 0.0);
        assert_eq!(rows[1].date, today);
    }

    #[test]
    fn leads_csv_builds_display_name_with_email_fallback() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let text = "First Name,Last Name,Email\nJane,Doe,jane@acme.com\n,,anon@x.com\n";
        let rows = parse_leads_csv(text, today).unwrap();
        assert_eq!(rows[0].contact, "Jane Doe");
        assert_eq!(rows[1].contact, "anon@x.com");
        assert_eq!(rows[1].email, "anon@x.com");
    }

    #[test]
    fn exported_partners_csv_round_trips_through_the_importer() {
        let rows = vec![Partner {
            name: "Acme".to_string(),
            tier: Tier::Bronze,
            contact: "acme.com".to_string(),
            phone: String::new(),
            status: PartnerStatus::Active,
            revenue: 0.0,
            deals: 0,
            growth: 0.0,
        }];
        let text = export_partners_csv(&rows).unwrap();
        assert!(text.starts_with("name,tier,contact"));
        let parsed = parse_partners_csv(&text).unwrap();
        assert_eq!(parsed[0].name, "Acme");
    }
}

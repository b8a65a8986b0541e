//! HubSpot reader and field mapping into the internal PRM entities.
//!
//! Raw record shapes carry explicit optional properties rather than ad hoc
//! property probing; every mapper substitutes a documented default when a
//! property is absent and never fails on a malformed record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use prm_core::{Deal, DealStatus, Lead, Partner, Tier};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::info_span;

pub const CRATE_NAME: &str = "prm-hubspot";

/// Property selections requested from the CRM, matching exactly what the
/// mappers consume.
pub const COMPANY_PROPERTIES: &str = "name,domain,phone";
pub const DEAL_PROPERTIES: &str = "dealname,amount,dealstage,closedate";
pub const CONTACT_PROPERTIES: &str = "firstname,lastname,email,phone,company";

/// Page size cap for object listing. Only the first page is read; the
/// pagination cursor is not followed (known completeness limitation).
pub const PAGE_LIMIT: u32 = 100;

pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyProperties {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealProperties {
    pub dealname: Option<String>,
    pub amount: Option<String>,
    pub dealstage: Option<String>,
    pub closedate: Option<String>,
    // Extra properties only webhook payloads carry.
    pub company_name: Option<String>,
    pub company: Option<String>,
    pub partner_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactProperties {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    // Extra properties only webhook payloads carry.
    pub name: Option<String>,
    pub partner_tier: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCompany {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: CompanyProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDeal {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: DealProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: ContactProperties,
}

#[derive(Debug, Clone, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// parseFloat-lite: missing or unparsable amounts become 0.
pub fn parse_amount(amount: Option<&str>) -> f64 {
    amount
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Stage tokens are compared case-sensitively; every unknown stage,
/// including an absent one, lands in Pending.
pub fn classify_stage(stage: Option<&str>) -> DealStatus {
    match stage {
        Some("closedwon") => DealStatus::Approved,
        Some("closedlost") => DealStatus::Rejected,
        _ => DealStatus::Pending,
    }
}

/// Close dates arrive as ISO dates or full timestamps; only the date prefix
/// is kept. Anything unparsable falls back to `today`.
pub fn parse_close_date(closedate: Option<&str>, today: NaiveDate) -> NaiveDate {
    closedate
        .map(str::trim)
        .and_then(|s| s.get(..10))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or(today)
}

/// Company -> Partner. Tier is always forced to Bronze and the performance
/// numbers are reset to zero; the mapper never imports historical figures.
pub fn map_company(raw: &RawCompany) -> Partner {
    Partner {
        name: non_empty(&raw.properties.name)
            .unwrap_or("Unknown Company")
            .to_string(),
        tier: Tier::Bronze,
        contact: non_empty(&raw.properties.domain).unwrap_or_default().to_string(),
        phone: non_empty(&raw.properties.phone).unwrap_or_default().to_string(),
        status: prm_core::PartnerStatus::Active,
        revenue: 0.0,
        deals: 0,
        growth: 0.0,
    }
}

/// Deal -> Deal, migration/sync shape: company and partner are not carried.
pub fn map_deal(raw: &RawDeal, today: NaiveDate) -> Deal {
    Deal {
        name: non_empty(&raw.properties.dealname)
            .unwrap_or("Untitled Deal")
            .to_string(),
        company: "Unknown".to_string(),
        value: parse_amount(raw.properties.amount.as_deref()),
        status: classify_stage(raw.properties.dealstage.as_deref()),
        partner: None,
        date: parse_close_date(raw.properties.closedate.as_deref(), today),
        description: None,
    }
}

/// Contact -> Lead. Status and priority are always forced to their defaults
/// even when the source carries a priority signal.
pub fn map_contact(raw: &RawContact, today: NaiveDate) -> Lead {
    let first = non_empty(&raw.properties.firstname).unwrap_or_default();
    let last = non_empty(&raw.properties.lastname).unwrap_or_default();
    let display = format!("{first} {last}").trim().to_string();
    Lead {
        company: non_empty(&raw.properties.company)
            .unwrap_or("Unknown Company")
            .to_string(),
        contact: if display.is_empty() { "Unknown".to_string() } else { display },
        email: non_empty(&raw.properties.email).unwrap_or_default().to_string(),
        phone: non_empty(&raw.properties.phone).unwrap_or_default().to_string(),
        value: 0.0,
        status: prm_core::LeadStatus::New,
        priority: prm_core::LeadPriority::Medium,
        date: today,
        notes: None,
        assigned_to: None,
    }
}

/// Webhook deal push: carries company/partner/description hints and has no
/// Rejected branch; the delivery date is always "today".
pub fn map_webhook_deal(raw: &RawDeal, today: NaiveDate) -> Deal {
    let status = match raw.properties.dealstage.as_deref() {
        Some("closedwon") => DealStatus::Approved,
        _ => DealStatus::Pending,
    };
    Deal {
        name: non_empty(&raw.properties.dealname)
            .unwrap_or("Untitled Deal")
            .to_string(),
        company: non_empty(&raw.properties.company_name)
            .or(non_empty(&raw.properties.company))
            .unwrap_or("Unknown")
            .to_string(),
        value: parse_amount(raw.properties.amount.as_deref()),
        status,
        partner: non_empty(&raw.properties.partner_name).map(ToString::to_string),
        date: today,
        description: non_empty(&raw.properties.description).map(ToString::to_string),
    }
}

/// Webhook contact push maps to a Partner, honoring a source tier hint when
/// it parses and falling back to Bronze otherwise.
pub fn map_webhook_contact(raw: &RawContact) -> Partner {
    let tier = non_empty(&raw.properties.partner_tier)
        .and_then(Tier::parse)
        .unwrap_or_default();
    Partner {
        name: non_empty(&raw.properties.company)
            .or(non_empty(&raw.properties.name))
            .unwrap_or("Unknown Company")
            .to_string(),
        tier,
        contact: non_empty(&raw.properties.email)
            .or(non_empty(&raw.properties.contact_email))
            .unwrap_or_default()
            .to_string(),
        phone: non_empty(&raw.properties.phone)
            .or(non_empty(&raw.properties.contact_phone))
            .unwrap_or_default()
            .to_string(),
        status: prm_core::PartnerStatus::Active,
        revenue: 0.0,
        deals: 0,
        growth: 0.0,
    }
}

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("crm returned http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// One paginated read per entity kind. Failure of one kind is fatal for that
/// kind only; the orchestrator decides whether siblings still run.
#[async_trait]
pub trait CrmReader: Send + Sync {
    async fn list_companies(&self) -> Result<Vec<RawCompany>, CrmError>;
    async fn list_deals(&self) -> Result<Vec<RawDeal>, CrmError>;
    async fn list_contacts(&self) -> Result<Vec<RawContact>, CrmError>;
}

/// Builds a reader from the per-request access token. The token arrives in
/// the request body, so readers are constructed per call rather than shared.
pub trait CrmConnector: Send + Sync {
    fn reader(&self, access_token: &str) -> Result<Box<dyn CrmReader>, CrmError>;
}

#[derive(Debug, Clone)]
pub struct HubSpotClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HubSpotClient {
    pub fn new(access_token: impl Into<String>) -> Result<Self, CrmError> {
        Self::with_base_url(access_token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: access_token.into(),
        })
    }

    async fn list_objects<T: DeserializeOwned>(
        &self,
        object: &str,
        properties: &str,
    ) -> Result<Vec<T>, CrmError> {
        let url = format!(
            "{}/crm/v3/objects/{object}?limit={PAGE_LIMIT}&properties={properties}",
            self.base_url
        );
        let span = info_span!("crm_list", object, url);
        let _guard = span.enter();

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CrmError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        let body: ListResponse<T> = resp.json().await?;
        Ok(body.results)
    }
}

#[async_trait]
impl CrmReader for HubSpotClient {
    async fn list_companies(&self) -> Result<Vec<RawCompany>, CrmError> {
        self.list_objects("companies", COMPANY_PROPERTIES).await
    }

    async fn list_deals(&self) -> Result<Vec<RawDeal>, CrmError> {
        self.list_objects("deals", DEAL_PROPERTIES).await
    }

    async fn list_contacts(&self) -> Result<Vec<RawContact>, CrmError> {
        self.list_objects("contacts", CONTACT_PROPERTIES).await
    }
}

#[derive(Debug, Clone)]
pub struct HubSpotConnector {
    base_url: String,
}

impl HubSpotConnector {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for HubSpotConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CrmConnector for HubSpotConnector {
    fn reader(&self, access_token: &str) -> Result<Box<dyn CrmReader>, CrmError> {
        Ok(Box::new(HubSpotClient::with_base_url(
            access_token,
            self.base_url.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn company(name: Option<&str>, domain: Option<&str>) -> RawCompany {
        RawCompany {
            id: None,
            properties: CompanyProperties {
                name: name.map(ToString::to_string),
                domain: domain.map(ToString::to_string),
                phone: None,
            },
        }
    }

    #[test]
    fn company_without_name_maps_to_unknown_company_and_bronze() {
        let partner = map_company(&company(None, Some("acme.com")));
        assert_eq!(partner.name, "Unknown Company");
        assert_eq!(partner.tier, Tier::Bronze);
        assert_eq!(partner.contact, "acme.com");
        assert_eq!(partner.revenue, 0.0);
        assert_eq!(partner.deals, 0);
    }

    #[test]
    fn company_tier_is_forced_to_bronze_regardless_of_input() {
        // The listing mapper has no tier input at all; the webhook mapper is
        // the only path that reads a tier hint.
        let partner = map_company(&company(Some("Globex"), None));
        assert_eq!(partner.tier, Tier::Bronze);
        assert_eq!(partner.contact, "");
    }

    fn deal(stage: Option<&str>, amount: Option<&str>, closedate: Option<&str>) -> RawDeal {
        RawDeal {
            id: None,
            properties: DealProperties {
                dealname: Some("Acme Deal".into()),
                amount: amount.map(ToString::to_string),
                dealstage: stage.map(ToString::to_string),
                closedate: closedate.map(ToString::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn stage_classification_covers_the_full_vocabulary() {
        let cases = [
            (Some("closedwon"), DealStatus::Approved),
            (Some("closedlost"), DealStatus::Rejected),
            (Some("qualifiedtobuy"), DealStatus::Pending),
            (Some(""), DealStatus::Pending),
            (None, DealStatus::Pending),
        ];
        for (stage, expected) in cases {
            assert_eq!(classify_stage(stage), expected, "stage {stage:?}");
        }
        // Comparison is case-sensitive.
        assert_eq!(classify_stage(Some("ClosedWon")), DealStatus::Pending);
    }

    #[test]
    fn amount_parsing_defaults_to_zero() {
        assert_eq!(parse_amount(Some("1500.50")), 1500.5);
        assert_eq!(parse_amount(Some("not-a-number")), 0.0);
        assert_eq!(parse_amount(Some("")), 0.0);
        assert_eq!(parse_amount(None), 0.0);
    }

    #[test]
    fn acme_deal_maps_end_to_end() {
        let raw = deal(Some("closedwon"), Some("50000"), Some("2024-01-01"));
        let mapped = map_deal(&raw, today());
        assert_eq!(mapped.name, "Acme Deal");
        assert_eq!(mapped.company, "Unknown");
        assert_eq!(mapped.value, 50000.0);
        assert_eq!(mapped.status, DealStatus::Approved);
        assert_eq!(mapped.partner, None);
        assert_eq!(mapped.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(mapped.description, None);
    }

    #[test]
    fn missing_or_garbled_close_date_falls_back_to_today() {
        assert_eq!(parse_close_date(None, today()), today());
        assert_eq!(parse_close_date(Some("soon"), today()), today());
        assert_eq!(
            parse_close_date(Some("2024-03-05T10:30:00Z"), today()),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn contact_display_name_concatenates_and_falls_back() {
        let mut raw = RawContact::default();
        raw.properties.firstname = Some("Ada".into());
        raw.properties.lastname = Some("Lovelace".into());
        let lead = map_contact(&raw, today());
        assert_eq!(lead.contact, "Ada Lovelace");
        assert_eq!(lead.company, "Unknown Company");
        assert_eq!(lead.status, prm_core::LeadStatus::New);
        assert_eq!(lead.priority, prm_core::LeadPriority::Medium);

        let empty = map_contact(&RawContact::default(), today());
        assert_eq!(empty.contact, "Unknown");
        assert_eq!(empty.email, "");
    }

    #[test]
    fn webhook_deal_has_no_rejected_branch_and_carries_hints() {
        let mut raw = deal(Some("closedlost"), Some("10"), None);
        raw.properties.company_name = Some("Initech".into());
        raw.properties.partner_name = Some("Globex".into());
        raw.properties.description = Some("renewal".into());
        let mapped = map_webhook_deal(&raw, today());
        assert_eq!(mapped.status, DealStatus::Pending);
        assert_eq!(mapped.company, "Initech");
        assert_eq!(mapped.partner.as_deref(), Some("Globex"));
        assert_eq!(mapped.description.as_deref(), Some("renewal"));
        assert_eq!(mapped.date, today());
    }

    #[test]
    fn webhook_contact_honors_a_parsable_tier_hint() {
        let mut raw = RawContact::default();
        raw.properties.company = Some("Initech".into());
        raw.properties.partner_tier = Some("Gold".into());
        raw.properties.contact_email = Some("ops@initech.com".into());
        let partner = map_webhook_contact(&raw);
        assert_eq!(partner.name, "Initech");
        assert_eq!(partner.tier, Tier::Gold);
        assert_eq!(partner.contact, "ops@initech.com");

        raw.properties.partner_tier = Some("Diamond".into());
        assert_eq!(map_webhook_contact(&raw).tier, Tier::Bronze);
    }

    #[test]
    fn raw_records_deserialize_from_crm_payload_shapes() {
        let json = r#"{
            "id": "512",
            "properties": {
                "dealname": "Acme Deal",
                "amount": "50000",
                "dealstage": "closedwon",
                "closedate": "2024-01-01",
                "hs_lastmodifieddate": "ignored"
            }
        }"#;
        let raw: RawDeal = serde_json::from_str(json).unwrap();
        assert_eq!(raw.id.as_deref(), Some("512"));
        assert_eq!(raw.properties.dealstage.as_deref(), Some("closedwon"));

        let bare: RawCompany = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.properties.name, None);
    }
}

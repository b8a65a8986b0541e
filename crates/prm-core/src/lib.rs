//! Core domain model for the PRM sync service.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "prm-core";

/// Partner classification. Display-only in this core; no business logic hangs
/// off the tier beyond sorting and badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "Bronze",
            Tier::Silver => "Silver",
            Tier::Gold => "Gold",
            Tier::Platinum => "Platinum",
        }
    }

    /// Best-effort parse; unknown values fall back to the caller's default.
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "Bronze" => Some(Tier::Bronze),
            "Silver" => Some(Tier::Silver),
            "Gold" => Some(Tier::Gold),
            "Platinum" => Some(Tier::Platinum),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartnerStatus {
    #[default]
    Active,
    Inactive,
    Pending,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Active => "Active",
            PartnerStatus::Inactive => "Inactive",
            PartnerStatus::Pending => "Pending",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "Active" => Some(PartnerStatus::Active),
            "Inactive" => Some(PartnerStatus::Inactive),
            "Pending" => Some(PartnerStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for PartnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deal status is always one of these three values regardless of the source
/// CRM's stage vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DealStatus {
    Approved,
    #[default]
    Pending,
    Rejected,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Approved => "Approved",
            DealStatus::Pending => "Pending",
            DealStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "Approved" => Some(DealStatus::Approved),
            "Pending" => Some(DealStatus::Pending),
            "Rejected" => Some(DealStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeadStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Unqualified,
    Converted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Qualified => "Qualified",
            LeadStatus::Unqualified => "Unqualified",
            LeadStatus::Converted => "Converted",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "New" => Some(LeadStatus::New),
            "Contacted" => Some(LeadStatus::Contacted),
            "Qualified" => Some(LeadStatus::Qualified),
            "Unqualified" => Some(LeadStatus::Unqualified),
            "Converted" => Some(LeadStatus::Converted),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeadPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl LeadPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadPriority::Low => "Low",
            LeadPriority::Medium => "Medium",
            LeadPriority::High => "High",
            LeadPriority::Urgent => "Urgent",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "Low" => Some(LeadPriority::Low),
            "Medium" => Some(LeadPriority::Medium),
            "High" => Some(LeadPriority::High),
            "Urgent" => Some(LeadPriority::Urgent),
            _ => None,
        }
    }
}

impl fmt::Display for LeadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An organization with which a commercial relationship exists.
///
/// `name` is the natural key used for upsert reconciliation. The sync
/// pipeline always writes fresh defaulted values for `revenue`, `deals`, and
/// `growth`; it never imports historical performance numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub name: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub status: PartnerStatus,
    #[serde(default)]
    pub revenue: f64,
    #[serde(default)]
    pub deals: i64,
    #[serde(default)]
    pub growth: f64,
}

/// A commercial opportunity, optionally tied to a partner by name.
///
/// `partner` is a loose string reference to `Partner::name`; there is no
/// referential-integrity enforcement, so a partner rename orphans it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub status: DealStatus,
    #[serde(default)]
    pub partner: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
}

/// A prospective contact. `email` is the natural key for upsert
/// reconciliation; an empty email collides with every other empty email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub company: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(default)]
    pub priority: LeadPriority,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

/// Persisted partner row with its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub partner: Partner,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub deal: Deal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub lead: Lead,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_their_canonical_strings() {
        for tier in [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Platinum] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        for status in [DealStatus::Approved, DealStatus::Pending, DealStatus::Rejected] {
            assert_eq!(DealStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Tier::parse("platinum"), None);
        assert_eq!(DealStatus::parse("closedwon"), None);
    }

    #[test]
    fn defaults_match_migration_contract() {
        assert_eq!(Tier::default(), Tier::Bronze);
        assert_eq!(PartnerStatus::default(), PartnerStatus::Active);
        assert_eq!(DealStatus::default(), DealStatus::Pending);
        assert_eq!(LeadStatus::default(), LeadStatus::New);
        assert_eq!(LeadPriority::default(), LeadPriority::Medium);
    }

    #[test]
    fn partner_record_serializes_flat() {
        let record = PartnerRecord {
            id: Uuid::nil(),
            partner: Partner {
                name: "Acme".into(),
                tier: Tier::Gold,
                contact: "acme.com".into(),
                phone: String::new(),
                status: PartnerStatus::Active,
                revenue: 1000.0,
                deals: 2,
                growth: 0.5,
            },
            created_at: DateTime::<Utc>::MIN_UTC,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["name"], "Acme");
        assert_eq!(value["tier"], "Gold");
        assert!(value.get("partner").is_none());
    }
}

//! Database models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum stored as TEXT
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("Unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Per-employee SMS conversation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStep {
    Idle,
    AwaitingConfirmation,
    AwaitingManualEntry,
    AwaitingMissedDetails,
    AwaitingLanguage,
    AwaitingDocConfirm,
}

text_enum!(ConversationStep {
    Idle => "idle",
    AwaitingConfirmation => "awaiting_confirmation",
    AwaitingManualEntry => "awaiting_manual_entry",
    AwaitingMissedDetails => "awaiting_missed_details",
    AwaitingLanguage => "awaiting_language",
    AwaitingDocConfirm => "awaiting_doc_confirm",
});

/// Review status shared by receipts and the other document tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Pending,
    Confirmed,
    Flagged,
    Rejected,
    Deleted,
    Duplicate,
}

text_enum!(RecordStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Flagged => "flagged",
    Rejected => "rejected",
    Deleted => "deleted",
    Duplicate => "duplicate",
});

/// SMS reply language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Es,
}

text_enum!(Language {
    En => "en",
    Es => "es",
});

/// Document kinds the classifier can return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Receipt,
    Invoice,
    PackingSlip,
    PurchaseOrder,
    Unknown,
}

text_enum!(DocumentKind {
    Receipt => "receipt",
    Invoice => "invoice",
    PackingSlip => "packing_slip",
    PurchaseOrder => "purchase_order",
    Unknown => "unknown",
});

impl DocumentKind {
    /// Table holding records of this kind
    pub fn table(&self) -> &'static str {
        match self {
            DocumentKind::Receipt | DocumentKind::Unknown => "receipts",
            DocumentKind::Invoice => "invoices",
            DocumentKind::PackingSlip => "packing_slips",
            DocumentKind::PurchaseOrder => "purchase_orders",
        }
    }
}

/// Dashboard system role, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    SuperAdmin,
    CompanyAdmin,
    Manager,
    Employee,
}

text_enum!(SystemRole {
    SuperAdmin => "super_admin",
    CompanyAdmin => "company_admin",
    Manager => "manager",
    Employee => "employee",
});

impl SystemRole {
    pub const ALL: [SystemRole; 4] = [
        SystemRole::SuperAdmin,
        SystemRole::CompanyAdmin,
        SystemRole::Manager,
        SystemRole::Employee,
    ];

    /// Numeric rank; unknown roles are 0 (see [`role_level`])
    pub fn level(&self) -> u8 {
        match self {
            SystemRole::SuperAdmin => 4,
            SystemRole::CompanyAdmin => 3,
            SystemRole::Manager => 2,
            SystemRole::Employee => 1,
        }
    }
}

/// Rank of a stored role string; unrecognized values rank below every role
pub fn role_level(role: &str) -> u8 {
    role.parse::<SystemRole>().map(|r| r.level()).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: i64,
    pub phone_number: String,
    pub first_name: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub crew: Option<String>,
    pub is_active: bool,
    pub language_preference: Option<String>,
}

impl Employee {
    /// Full name when recorded, otherwise first name
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(full) if !full.trim().is_empty() => full,
            _ => &self.first_name,
        }
    }

    /// Saved reply language, `None` until the employee has picked one
    pub fn language(&self) -> Option<Language> {
        self.language_preference.as_deref().and_then(|l| l.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: i64,
    pub year: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub tire_size: Option<String>,
    pub plate_number: Option<String>,
    pub vin: Option<String>,
    pub nickname: Option<String>,
    pub assigned_to: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MaintenanceRecord {
    pub id: i64,
    pub vehicle_id: i64,
    pub service_date: Option<String>,
    pub description: Option<String>,
    pub cost: Option<f64>,
    pub mileage: Option<i64>,
    pub vendor: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorizedUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub system_role: String,
    pub employee_id: Option<i64>,
    pub is_active: bool,
    pub last_login: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_round_trip_text() {
        for step in [
            ConversationStep::Idle,
            ConversationStep::AwaitingDocConfirm,
            ConversationStep::AwaitingLanguage,
        ] {
            assert_eq!(step.as_str().parse::<ConversationStep>().unwrap(), step);
        }
        assert!("sleeping".parse::<ConversationStep>().is_err());
    }

    #[test]
    fn test_role_levels() {
        assert_eq!(role_level("super_admin"), 4);
        assert_eq!(role_level("company_admin"), 3);
        assert_eq!(role_level("manager"), 2);
        assert_eq!(role_level("employee"), 1);
        assert_eq!(role_level("unknown_role"), 0);
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let mut emp = Employee {
            id: 1,
            phone_number: "+14075551111".into(),
            first_name: "Omar".into(),
            full_name: Some("Omar Rodriguez".into()),
            email: None,
            crew: None,
            is_active: true,
            language_preference: None,
        };
        assert_eq!(emp.display_name(), "Omar Rodriguez");
        emp.full_name = Some("  ".into());
        assert_eq!(emp.display_name(), "Omar");
        assert_eq!(emp.language(), None);
        emp.language_preference = Some("es".into());
        assert_eq!(emp.language(), Some(Language::Es));
    }

    #[test]
    fn test_unknown_document_kind_goes_to_receipts() {
        assert_eq!(DocumentKind::Unknown.table(), "receipts");
        assert_eq!(DocumentKind::PackingSlip.table(), "packing_slips");
    }
}

//! Role and module access checks
//!
//! Access levels are ordered `none < view < edit < admin`. Each system role
//! has a default level per module; users below company_admin may carry a
//! per-module override in `user_permissions` that replaces the default.

use crewledger_common::db::{role_level, SystemRole};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;

/// Module access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    View,
    Edit,
    Admin,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::View => "view",
            AccessLevel::Edit => "edit",
            AccessLevel::Admin => "admin",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = crewledger_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AccessLevel::None),
            "view" => Ok(AccessLevel::View),
            "edit" => Ok(AccessLevel::Edit),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(crewledger_common::Error::InvalidInput(format!(
                "Unknown access level: {}",
                other
            ))),
        }
    }
}

/// Application modules guarded by the permission table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    CrewLedger,
    CrewCert,
    CrewAsset,
    Settings,
    UserManagement,
}

impl Module {
    pub const ALL: [Module; 5] = [
        Module::CrewLedger,
        Module::CrewCert,
        Module::CrewAsset,
        Module::Settings,
        Module::UserManagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::CrewLedger => "crewledger",
            Module::CrewCert => "crewcert",
            Module::CrewAsset => "crewasset",
            Module::Settings => "settings",
            Module::UserManagement => "user_management",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default access for a role string; unknown roles get nothing
pub fn default_access(role: &str, module: Module) -> AccessLevel {
    use AccessLevel::*;

    let Ok(role) = role.parse::<SystemRole>() else {
        return None;
    };

    match (role, module) {
        (SystemRole::SuperAdmin, _) => Admin,
        (_, Module::Settings | Module::UserManagement) => None,
        (SystemRole::CompanyAdmin, _) => Edit,
        (SystemRole::Manager, _) => View,
        (SystemRole::Employee, Module::CrewAsset) => None,
        (SystemRole::Employee, _) => View,
    }
}

/// Whether `role` reaches `required` on `module`
///
/// super_admin and company_admin always use the default table. Lower roles
/// use `override_level` instead of the default when one is stored.
pub fn check_permission(
    role: &str,
    module: Module,
    required: AccessLevel,
    override_level: Option<AccessLevel>,
) -> bool {
    let effective = if role_level(role) >= SystemRole::CompanyAdmin.level() {
        default_access(role, module)
    } else {
        override_level.unwrap_or_else(|| default_access(role, module))
    };
    effective >= required
}

/// Whether `role` ranks at or above `minimum`
pub fn has_minimum_role(role: &str, minimum: SystemRole) -> bool {
    role_level(role) >= minimum.level()
}

/// Employees only ever see their own records
pub fn is_own_data_only(role: &str) -> bool {
    role == SystemRole::Employee.as_str()
}

/// Stored per-user override for `module`, if any
pub async fn load_override(
    pool: &SqlitePool,
    user_id: i64,
    module: Module,
) -> crewledger_common::Result<Option<AccessLevel>> {
    let level: Option<String> = sqlx::query_scalar(
        "SELECT access_level FROM user_permissions WHERE user_id = ? AND module = ?",
    )
    .bind(user_id)
    .bind(module.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(level.and_then(|l| l.parse().ok()))
}

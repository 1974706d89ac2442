//! The fixed battery of diagnostic questions.
//!
//! Every refresh runs the same ordered list of read-only queries against an
//! account. The first question must be the health check score, which the
//! snapshot assembler reads back as the account's headline metric.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query endpoint a question is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEngine {
    /// The regular data query API.
    #[default]
    Default,
    /// The tooling API (setup and metadata objects).
    Tooling,
}

impl QueryEngine {
    /// Returns `true` for the default engine (omitted from serialized answers).
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

/// Predicate applied to every record of a fully paginated result.
pub type RecordFilter = fn(&Value) -> bool;

/// One diagnostic query run against every account.
#[derive(Debug, Clone)]
pub struct Question {
    /// Display name; the answer hash derives from it.
    pub name: String,
    /// Query text.
    pub query: String,
    /// Endpoint the query is sent to.
    pub engine: QueryEngine,
    /// Optional icon class for the dashboard.
    pub icon: Option<String>,
    /// Optional post-filter over the accumulated records.
    pub filter: Option<RecordFilter>,
    /// Keep record lists above the large-result threshold.
    pub keep_large_results: bool,
}

impl Question {
    /// Creates a default-engine question with no icon or filter.
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            engine: QueryEngine::Default,
            icon: None,
            filter: None,
            keep_large_results: false,
        }
    }

    /// Routes the question to the tooling API.
    #[must_use]
    pub fn tooling(mut self) -> Self {
        self.engine = QueryEngine::Tooling;
        self
    }

    /// Sets the icon class.
    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Sets the record post-filter.
    #[must_use]
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Opts out of large-result suppression.
    #[must_use]
    pub fn keep_large_results(mut self) -> Self {
        self.keep_large_results = true;
        self
    }

    /// Lowercase alphanumeric hash of the name.
    #[must_use]
    pub fn hash(&self) -> String {
        question_hash(&self.name)
    }
}

/// Derives the answer hash: non-word characters removed, lowercased.
#[must_use]
pub fn question_hash(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

const ASSIGNEE_COLUMNS: &str = "Assignee.Id,Assignee.Username,Assignee.Name,Assignee.Email";

/// Builds a "users holding permission X" question.
fn permission_holders(permission: &str) -> Question {
    Question::new(
        format!("Users with {permission}"),
        format!(
            "select {ASSIGNEE_COLUMNS} FROM PermissionSetAssignment \
             WHERE PermissionSet.Permissions{permission} = true \
             AND Assignee.IsActive=true AND Assignee.usertype='standard' \
             group by {ASSIGNEE_COLUMNS}"
        ),
    )
    .with_icon("fa-user")
}

/// Permissions audited by the "Users with ..." questions, in display order.
const AUDITED_PERMISSIONS: [&str; 15] = [
    "ViewAllData",
    "ModifyAllData",
    "ManageUsers",
    "ManageInternalUsers",
    "CustomizeApplication",
    "ApiUserOnly",
    "AssignPermissionSets",
    "ManageIpAddresses",
    "ManagePasswordPolicies",
    "ManageSharing",
    "ManageRoles",
    "ManageProfilesPermissionsets",
    "ResetPasswords",
    "AuthorApex",
    "PasswordNeverExpires",
];

/// Returns the ordered question battery.
///
/// `corp_domain` is interpolated into the corporate email hygiene question.
#[must_use]
pub fn default_battery(corp_domain: &str) -> Vec<Question> {
    let mut battery = vec![
        Question::new("Health Check score", "SELECT Score FROM SecurityHealthCheck")
            .tooling()
            .with_icon("fa-medkit"),
        Question::new(
            "Health Check risks",
            "SELECT RiskType,Setting,SettingGroup,OrgValue,StandardValue \
             FROM SecurityHealthCheckRisks where RiskType in ('HIGH_RISK', 'MEDIUM_RISK')",
        )
        .tooling()
        .with_icon("fa-medkit"),
        Question::new(
            "Standard users",
            "select count() from user where isactive=true and usertype='standard'",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Standard users created last 48h",
            "select id,name,profile.name,createddate from user where isactive=true \
             and usertype='standard' and createddate = last_n_days:2",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Chatter-only users",
            "select count() from user where isactive=true and usertype='csnonly'",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Partner-portal users",
            "select count() from user where isactive=true and usertype='PowerPartner'",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Customer-portal users",
            "select count() from user where isactive=true and \
             (usertype='CustomerSuccess' OR usertype='PowerCustomerSuccess')",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "High-volume users",
            "select count() from user where isactive=true and usertype='CSPLitePortal'",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Frozen users",
            "select id,username,name from user where isactive=true and id in \
             (select UserId from UserLogin where isfrozen=true) order by lastmodifieddate desc",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Users not logged in 90 days",
            "select count() FROM User where isactive=true and \
             (LastLoginDate<last_n_days:90 OR LastLoginDate=null)",
        )
        .with_icon("fa-user-o"),
        Question::new(
            "Standard users not logged in 90 days",
            "select count() FROM User where isactive=true and usertype='standard' and \
             (LastLoginDate<last_n_days:90 OR LastLoginDate=null)",
        )
        .with_icon("fa-user-o"),
    ];

    battery.extend(AUDITED_PERMISSIONS.iter().map(|p| permission_holders(p)));

    battery.extend([
        Question::new(
            "Users without corporate email",
            format!(
                "select Id,Username,Name,Email from user where isactive=true and \
                 usertype='standard' and (NOT (email like '%@%{corp_domain}'))"
            ),
        )
        .with_icon("fa-user"),
        Question::new(
            "Internal roles",
            "select count() from UserRole where portaltype='none'",
        )
        .with_icon("fa-sitemap"),
        Question::new(
            "Unassigned Internal roles",
            "select count() from UserRole where portaltype='none' and \
             id not in (select userroleid from user)",
        )
        .with_icon("fa-sitemap"),
        Question::new(
            "Customer-portal roles",
            "select count() from userrole where PortalType='CustomerPortal'",
        )
        .with_icon("fa-sitemap"),
        Question::new(
            "Partner-portal roles",
            "select count() from userrole where PortalType='Partner'",
        )
        .with_icon("fa-sitemap"),
        Question::new(
            "Login IP ranges",
            "SELECT ProfileId,IpStartAddress,IpEndAddress FROM LoginIpRange",
        )
        .with_icon("fa-shield"),
        Question::new("Profiles", "select count() from Profile").with_icon("fa-shield"),
        Question::new(
            "Used Profiles without IP ranges",
            "select Id,Name from profile where id not in (select ProfileId FROM LoginIpRange) \
             and id in (select profileid from user)",
        )
        .with_icon("fa-shield"),
        Question::new(
            "Unused custom Profiles",
            "SELECT Profile.Name,ProfileId FROM PermissionSet where IsCustom=true and \
             IsOwnedByProfile=true and ProfileId not in (select profileid from user)",
        )
        .with_icon("fa-shield"),
        Question::new(
            "PermissionSets",
            "select count() from PermissionSet WHERE IsOwnedByProfile = false",
        )
        .with_icon("fa-shield"),
        Question::new("VF pages", "select count() from apexpage").with_icon("fa-code"),
        Question::new("VF components", "select count() from apexcomponent").with_icon("fa-code"),
        Question::new("Apex classes", "select count() from apexclass").with_icon("fa-code"),
        Question::new("Apex triggers", "select count() from apextrigger").with_icon("fa-code"),
        Question::new(
            "Remote Site Settings",
            "select SiteName,EndpointUrl,ProtocolMismatch from remoteproxy where IsActive=true",
        )
        .tooling()
        .with_icon("fa-code"),
        Question::new(
            "sObjects",
            "select MasterLabel,QualifiedApiName,NewUrl from entitydefinition \
             where IsCustomizable=true and IsFlsEnabled=true",
        )
        .tooling()
        .with_icon("fa-code"),
    ]);

    battery
}

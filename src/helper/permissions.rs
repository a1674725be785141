//! Role to capability mapping.
//!
//! This is the single place that decides what a role may do. Route guards, the
//! workflow engine and user administration all ask `has_permission`; nothing
//! else carries its own role checks.

use crate::models::{ArticleStatus, Role};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    PublishArticles,
    ReviewArticles,
    SetBreakingNews,
    SetFeatured,
    EditAllArticles,
    DeleteAllArticles,
    ManageCategories,
    ManageUsers,
    ManageSettings,
    ManageFeatured,
    ManageSections,
    ManageMenu,
    ManageEditorial,
    ManageContactInfo,
    ManageJobs,
    UploadMedia,
    DeleteAllMedia,
    DeleteOwnMedia,
    ViewAllComments,
    ModerateComments,
    ViewFullDashboard,
}

use Capability::*;

const ADMIN_CAPABILITIES: &[Capability] = &[
    PublishArticles,
    ReviewArticles,
    SetBreakingNews,
    SetFeatured,
    EditAllArticles,
    DeleteAllArticles,
    ManageCategories,
    ManageUsers,
    ManageSettings,
    ManageFeatured,
    ManageSections,
    ManageMenu,
    ManageEditorial,
    ManageContactInfo,
    ManageJobs,
    UploadMedia,
    DeleteAllMedia,
    DeleteOwnMedia,
    ViewAllComments,
    ModerateComments,
    ViewFullDashboard,
];

const EDITOR_CAPABILITIES: &[Capability] = &[
    PublishArticles,
    ReviewArticles,
    SetBreakingNews,
    SetFeatured,
    EditAllArticles,
    DeleteAllArticles,
    ManageCategories,
    ManageFeatured,
    UploadMedia,
    DeleteAllMedia,
    DeleteOwnMedia,
    ViewAllComments,
    ModerateComments,
    ViewFullDashboard,
];

const JOURNALIST_CAPABILITIES: &[Capability] = &[
    ReviewArticles,
    EditAllArticles,
    UploadMedia,
    DeleteOwnMedia,
    ViewAllComments,
];

const AUTHOR_CAPABILITIES: &[Capability] = &[UploadMedia, DeleteOwnMedia];

// Longest prefix wins; anything not listed is open to every signed-in role.
const PATH_CAPABILITIES: &[(&str, Capability)] = &[
    ("/admin/users", ManageUsers),
    ("/admin/settings", ManageSettings),
    ("/admin/activity", ViewFullDashboard),
    ("/admin/categories", ManageCategories),
    ("/admin/featured", ManageFeatured),
    ("/admin/sections", ManageSections),
    ("/admin/menu", ManageMenu),
    ("/admin/editorial", ManageEditorial),
    ("/admin/contact", ManageContactInfo),
    ("/admin/jobs", ManageJobs),
    ("/admin/review", ReviewArticles),
    ("/admin/comments", ViewAllComments),
    ("/admin/media", UploadMedia),
];

impl Capability {
    pub const ALL: &'static [Capability] = ADMIN_CAPABILITIES;

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishArticles => "publishArticles",
            ReviewArticles => "reviewArticles",
            SetBreakingNews => "setBreakingNews",
            SetFeatured => "setFeatured",
            EditAllArticles => "editAllArticles",
            DeleteAllArticles => "deleteAllArticles",
            ManageCategories => "manageCategories",
            ManageUsers => "manageUsers",
            ManageSettings => "manageSettings",
            ManageFeatured => "manageFeatured",
            ManageSections => "manageSections",
            ManageMenu => "manageMenu",
            ManageEditorial => "manageEditorial",
            ManageContactInfo => "manageContactInfo",
            ManageJobs => "manageJobs",
            UploadMedia => "uploadMedia",
            DeleteAllMedia => "deleteAllMedia",
            DeleteOwnMedia => "deleteOwnMedia",
            ViewAllComments => "viewAllComments",
            ModerateComments => "moderateComments",
            ViewFullDashboard => "viewFullDashboard",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

pub fn capabilities_for(role: Role) -> &'static [Capability] {
    match role {
        Role::Admin => ADMIN_CAPABILITIES,
        Role::Editor => EDITOR_CAPABILITIES,
        Role::Journalist => JOURNALIST_CAPABILITIES,
        Role::Author => AUTHOR_CAPABILITIES,
    }
}

pub fn has_permission(role: Role, capability: Capability) -> bool {
    capabilities_for(role).contains(&capability)
}

/// String-typed form for callers at the boundary. Unknown or absent values are simply `false`.
pub fn has_named_permission(role: Option<Role>, capability: &str) -> bool {
    match (role, capability.parse::<Capability>()) {
        (Some(role), Ok(capability)) => has_permission(role, capability),
        _ => false,
    }
}

/// Capability guarding `path`, if any. Matches whole path segments only.
pub fn required_capability(path: &str) -> Option<Capability> {
    let path = path.trim_end_matches('/');
    PATH_CAPABILITIES
        .iter()
        .filter(|(prefix, _)| {
            path == *prefix || path.strip_prefix(prefix).map_or(false, |rest| rest.starts_with('/'))
        })
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, capability)| *capability)
}

pub fn can_access_path(role: Role, path: &str) -> bool {
    required_capability(path).map_or(true, |capability| has_permission(role, capability))
}

/// Article statuses a role may pick as a target. Each one maps onto a workflow
/// action; `Draft` and `Rejected` are never offered. Roles without `publishArticles`
/// never see `Published` or `Scheduled`.
pub fn permitted_target_statuses(role: Role) -> Vec<ArticleStatus> {
    if has_permission(role, PublishArticles) {
        vec![
            ArticleStatus::PendingReview,
            ArticleStatus::Published,
            ArticleStatus::Scheduled,
        ]
    } else {
        vec![ArticleStatus::PendingReview]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_capability() {
        for capability in Capability::ALL {
            assert!(has_permission(Role::Admin, *capability), "{capability}");
        }
    }

    #[test]
    fn editor_cannot_manage_users_or_settings() {
        assert!(has_permission(Role::Editor, PublishArticles));
        assert!(has_permission(Role::Editor, ReviewArticles));
        assert!(has_permission(Role::Editor, SetBreakingNews));
        assert!(has_permission(Role::Editor, DeleteAllArticles));
        assert!(has_permission(Role::Editor, ModerateComments));
        assert!(!has_permission(Role::Editor, ManageUsers));
        assert!(!has_permission(Role::Editor, ManageSettings));
    }

    #[test]
    fn journalist_reviews_but_does_not_publish() {
        assert!(has_permission(Role::Journalist, ReviewArticles));
        assert!(has_permission(Role::Journalist, EditAllArticles));
        assert!(!has_permission(Role::Journalist, PublishArticles));
        assert!(!has_permission(Role::Journalist, ManageUsers));
        assert!(!has_permission(Role::Journalist, ManageSettings));
    }

    #[test]
    fn author_holds_no_elevated_capability() {
        for capability in [
            PublishArticles,
            ReviewArticles,
            SetBreakingNews,
            SetFeatured,
            EditAllArticles,
            DeleteAllArticles,
            ManageUsers,
            ManageSettings,
        ] {
            assert!(!has_permission(Role::Author, capability), "{capability}");
        }
    }

    #[test]
    fn predicate_is_total() {
        for role in Role::ALL {
            for capability in Capability::ALL {
                let first = has_permission(role, *capability);
                assert_eq!(first, has_permission(role, *capability));
                assert_eq!(first, has_named_permission(Some(role), capability.as_str()));
            }
        }
        assert!(!has_named_permission(None, "publishArticles"));
        assert!(!has_named_permission(Some(Role::Admin), "launchRockets"));
        assert!(!has_named_permission(Some(Role::Admin), ""));
    }

    #[test]
    fn path_access_follows_capabilities() {
        assert!(can_access_path(Role::Admin, "/admin/users"));
        assert!(!can_access_path(Role::Editor, "/admin/users/42"));
        assert!(can_access_path(Role::Editor, "/admin/categories/"));
        assert!(!can_access_path(Role::Author, "/admin/review"));
        // Unmapped paths are open; prefixes only match whole segments.
        assert!(can_access_path(Role::Author, "/admin/profile"));
        assert!(can_access_path(Role::Author, "/admin/usersettings"));
    }

    #[test]
    fn only_publishers_are_offered_published() {
        assert!(permitted_target_statuses(Role::Editor).contains(&ArticleStatus::Published));
        for role in [Role::Journalist, Role::Author] {
            let offered = permitted_target_statuses(role);
            assert!(!offered.contains(&ArticleStatus::Published));
            assert!(!offered.contains(&ArticleStatus::Scheduled));
            assert!(offered.contains(&ArticleStatus::PendingReview));
        }
    }

    #[test]
    fn draft_and_rejected_are_never_offered() {
        for role in Role::ALL {
            let offered = permitted_target_statuses(role);
            assert!(!offered.contains(&ArticleStatus::Draft), "{role}");
            assert!(!offered.contains(&ArticleStatus::Rejected), "{role}");
        }
    }
}

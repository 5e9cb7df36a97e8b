use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::store::Store;
use crate::types::{GrantTarget, PackagePermission, Permission, PermissionGrant, Principal};

/// Computes effective permissions from stored grants. Nothing here is
/// cached; every check reads the current grant rows.
pub struct PermissionResolver {
    store: Arc<dyn Store>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Grants that apply to the principal: direct grants plus grants
    /// targeting any of its groups. With a project filter, package
    /// grants for other projects are dropped; server grants always
    /// pass. A single matching grant is sufficient, there are no deny
    /// rules.
    pub fn effective_permissions(
        &self,
        principal: &Principal,
        project: Option<&str>,
    ) -> Result<Vec<PermissionGrant>> {
        if let Principal::Admin { username } = principal {
            return Ok(vec![synthetic_admin_grant(username)]);
        }

        let mut grants = Vec::new();
        if let Some(id) = principal.id() {
            grants.extend(
                self.store
                    .list_grants_for_target(&GrantTarget::Principal(id.to_string()))?,
            );
        }
        for group_id in principal.group_ids() {
            grants.extend(
                self.store
                    .list_grants_for_target(&GrantTarget::Group(group_id.clone()))?,
            );
        }

        if let Some(project) = project {
            grants.retain(|g| {
                g.permission.is_server() || g.project.as_deref() == Some(project)
            });
        }

        Ok(grants)
    }

    /// True for the configured admin account and for principals holding
    /// meta.admin directly or through a group.
    pub fn is_admin(&self, principal: &Principal) -> Result<bool> {
        if principal.is_admin() {
            return Ok(true);
        }
        Ok(self
            .effective_permissions(principal, None)?
            .iter()
            .any(|g| g.permission == Permission::META_ADMIN))
    }

    /// True for principals allowed to create new projects.
    pub fn can_create(&self, principal: &Principal) -> Result<bool> {
        Ok(self.effective_permissions(principal, None)?.iter().any(|g| {
            g.permission == Permission::META_ADMIN || g.permission == Permission::META_CREATE
        }))
    }

    /// The strongest package permission the principal holds for a
    /// project, or None if it holds none. Admins resolve to Manage
    /// everywhere without any stored rows.
    pub fn access_level(
        &self,
        principal: &Principal,
        project: &str,
    ) -> Result<Option<PackagePermission>> {
        if self.is_admin(principal)? {
            return Ok(Some(PackagePermission::Manage));
        }

        Ok(self
            .effective_permissions(principal, Some(project))?
            .iter()
            .filter_map(|g| g.permission.package_level())
            .max())
    }

    /// Whether the principal holds at least `required` on the project.
    pub fn has_access(
        &self,
        principal: &Principal,
        project: &str,
        required: PackagePermission,
    ) -> Result<bool> {
        Ok(self
            .access_level(principal, project)?
            .is_some_and(|level| level.satisfies(required)))
    }
}

fn synthetic_admin_grant(username: &str) -> PermissionGrant {
    PermissionGrant {
        id: format!("admin:{username}"),
        permission: Permission::META_ADMIN,
        target: GrantTarget::Principal(format!("admin:{username}")),
        project: None,
        created_at: Utc::now(),
    }
}

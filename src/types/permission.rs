use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Server-wide permissions. Not tied to any project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerPermission {
    /// May create new projects.
    Create,
    /// Full control over the registry.
    Admin,
}

/// Per-project permissions, ordered from weakest to strongest.
/// A stronger permission implies every weaker one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackagePermission {
    /// May list and download files.
    View,
    /// May upload new files.
    Edit,
    /// May manage grants for the project.
    Manage,
}

impl PackagePermission {
    /// Returns true if this permission satisfies the required one.
    #[must_use]
    pub fn satisfies(self, required: PackagePermission) -> bool {
        self >= required
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Server(ServerPermission),
    Package(PackagePermission),
}

impl Permission {
    pub const META_ADMIN: Permission = Permission::Server(ServerPermission::Admin);
    pub const META_CREATE: Permission = Permission::Server(ServerPermission::Create);
    pub const PKG_MANAGE: Permission = Permission::Package(PackagePermission::Manage);
    pub const PKG_EDIT: Permission = Permission::Package(PackagePermission::Edit);
    pub const PKG_VIEW: Permission = Permission::Package(PackagePermission::View);

    /// Converts a permission string to its typed value.
    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "meta.admin" => Some(Self::META_ADMIN),
            "meta.create" => Some(Self::META_CREATE),
            "pkg.manage" => Some(Self::PKG_MANAGE),
            "pkg.edit" => Some(Self::PKG_EDIT),
            "pkg.view" => Some(Self::PKG_VIEW),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Permission::Server(ServerPermission::Admin) => "meta.admin",
            Permission::Server(ServerPermission::Create) => "meta.create",
            Permission::Package(PackagePermission::Manage) => "pkg.manage",
            Permission::Package(PackagePermission::Edit) => "pkg.edit",
            Permission::Package(PackagePermission::View) => "pkg.view",
        }
    }

    /// Server permissions apply registry-wide and never carry a project.
    #[must_use]
    pub const fn is_server(self) -> bool {
        matches!(self, Permission::Server(_))
    }

    #[must_use]
    pub const fn package_level(self) -> Option<PackagePermission> {
        match self {
            Permission::Package(p) => Some(p),
            Permission::Server(_) => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Permission::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid permission: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_permission() {
        assert_eq!(Permission::parse("pkg.view"), Some(Permission::PKG_VIEW));
        assert_eq!(Permission::parse("meta.admin"), Some(Permission::META_ADMIN));
        assert_eq!(Permission::parse("invalid"), None);
    }

    #[test]
    fn test_roundtrip() {
        for s in ["meta.admin", "meta.create", "pkg.manage", "pkg.edit", "pkg.view"] {
            let p = Permission::parse(s).unwrap();
            assert_eq!(p.as_str(), s);
        }
    }

    #[test]
    fn test_package_order() {
        assert!(PackagePermission::Manage > PackagePermission::Edit);
        assert!(PackagePermission::Edit > PackagePermission::View);
        assert!(PackagePermission::Manage.satisfies(PackagePermission::View));
        assert!(PackagePermission::Edit.satisfies(PackagePermission::Edit));
        assert!(!PackagePermission::View.satisfies(PackagePermission::Edit));
    }

    #[test]
    fn test_max_picks_strongest() {
        let levels = [PackagePermission::View, PackagePermission::Manage, PackagePermission::Edit];
        assert_eq!(levels.iter().max(), Some(&PackagePermission::Manage));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Permission::PKG_EDIT).unwrap();
        assert_eq!(json, "\"pkg.edit\"");
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Permission::PKG_EDIT);
    }
}

//! Permission resolution over a catalog plus user and group overrides.
//!
//! # Precedence (for beginners)
//!
//! Every request names a `(service, operation)` pair such as
//! `("ASSET_SVR", "DOWNLOAD")`.  Whether a user may perform it is decided in
//! tiers, first decisive tier wins:
//!
//! 1. **User override**: an explicit `Allow`/`Deny` set for this user.
//! 2. **Groups**: every group the user belongs to is consulted.  If *any*
//!    group denies, the answer is deny; otherwise if any group allows, the
//!    answer is allow.  This is "deny-overrides-allow".
//! 3. **Catalog default**: the attribute the catalog ships with.
//!
//! `Default` at any tier means "no opinion here, ask the next tier".  If
//! nothing has an opinion the request is denied.
//!
//! # Fail-closed invariants
//!
//! - A pair absent from the catalog is never allowed, whatever the overrides.
//! - A catalog entry whose default is `Default` is denied unless an override
//!   allows it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A permission attribute at one precedence tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Allow,
    Deny,
    /// No opinion at this tier.
    #[default]
    Default,
}

impl Attribute {
    /// Lowercase name as used in catalogs and listings.
    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Allow => "allow",
            Attribute::Deny => "deny",
            Attribute::Default => "default",
        }
    }
}

/// Identifies one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionKey {
    pub service: String,
    pub operation: String,
}

impl PermissionKey {
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate catalog entry {service}.{operation}")]
    Duplicate { service: String, operation: String },

    #[error("catalog entry has an empty service or operation name")]
    EmptyName,
}

/// The immutable table of known operations and their default attribute.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<PermissionKey, Attribute>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog, rejecting duplicates and blank names.
    pub fn from_records<I>(records: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (PermissionKey, Attribute)>,
    {
        let mut catalog = Self::new();
        for (key, attribute) in records {
            if key.service.is_empty() || key.operation.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if catalog.entries.contains_key(&key) {
                return Err(CatalogError::Duplicate {
                    service: key.service,
                    operation: key.operation,
                });
            }
            catalog.entries.insert(key, attribute);
        }
        Ok(catalog)
    }

    /// Adds or replaces an entry.  Meant for building a catalog in code.
    pub fn insert(&mut self, service: &str, operation: &str, attribute: Attribute) {
        self.entries
            .insert(PermissionKey::new(service, operation), attribute);
    }

    pub fn contains(&self, service: &str, operation: &str) -> bool {
        self.entries
            .contains_key(&PermissionKey::new(service, operation))
    }

    /// Default attribute for a pair, or `None` when the pair is unknown.
    pub fn default_for(&self, service: &str, operation: &str) -> Option<Attribute> {
        self.entries
            .get(&PermissionKey::new(service, operation))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in `(service, operation)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&PermissionKey, Attribute)> {
        self.entries.iter().map(|(k, a)| (k, *a))
    }
}

/// Which tier produced an effective permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionSource {
    User,
    Group,
    Default,
}

impl PermissionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionSource::User => "user",
            PermissionSource::Group => "group",
            PermissionSource::Default => "default",
        }
    }
}

/// One row of a user's effective permission listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePermission {
    pub service: String,
    pub operation: String,
    /// The winning attribute; `Default` only when the catalog itself has no
    /// opinion, which resolves to deny.
    pub attribute: Attribute,
    pub source: PermissionSource,
}

impl EffectivePermission {
    pub fn allowed(&self) -> bool {
        self.attribute == Attribute::Allow
    }
}

type Overrides = HashMap<String, HashMap<PermissionKey, Attribute>>;

/// In-memory authorization engine.
///
/// The catalog is fixed at construction; overrides and memberships may be
/// changed at any time by whoever owns the resolver.
#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    catalog: Catalog,
    user_overrides: Overrides,
    group_overrides: Overrides,
    memberships: HashMap<String, BTreeSet<String>>,
}

impl PermissionResolver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ── Overrides and membership ────────────────────────────────────────────

    pub fn set_user_override(&mut self, user: &str, service: &str, operation: &str, attribute: Attribute) {
        set_override(&mut self.user_overrides, user, service, operation, attribute);
    }

    pub fn clear_user_override(&mut self, user: &str, service: &str, operation: &str) {
        clear_override(&mut self.user_overrides, user, service, operation);
    }

    pub fn set_group_override(&mut self, group: &str, service: &str, operation: &str, attribute: Attribute) {
        set_override(&mut self.group_overrides, group, service, operation, attribute);
    }

    pub fn clear_group_override(&mut self, group: &str, service: &str, operation: &str) {
        clear_override(&mut self.group_overrides, group, service, operation);
    }

    pub fn add_membership(&mut self, user: &str, group: &str) {
        self.memberships
            .entry(user.to_string())
            .or_default()
            .insert(group.to_string());
    }

    pub fn remove_membership(&mut self, user: &str, group: &str) {
        if let Some(groups) = self.memberships.get_mut(user) {
            groups.remove(group);
            if groups.is_empty() {
                self.memberships.remove(user);
            }
        }
    }

    /// Groups `user` belongs to, in name order.
    pub fn groups_of(&self, user: &str) -> impl Iterator<Item = &str> {
        self.memberships
            .get(user)
            .into_iter()
            .flat_map(|groups| groups.iter().map(String::as_str))
    }

    // ── Decisions ───────────────────────────────────────────────────────────

    /// Returns `true` only when the resolved attribute is `Allow`.
    pub fn is_allowed(&self, user: &str, service: &str, operation: &str) -> bool {
        let key = PermissionKey::new(service, operation);
        match self.catalog.entries.get(&key) {
            Some(&default) => self.resolve(user, &key, default).0 == Attribute::Allow,
            None => false,
        }
    }

    /// The listing shown to a user: one row per catalog entry, using the same
    /// precedence as [`is_allowed`](Self::is_allowed).
    pub fn effective_permissions(&self, user: &str) -> Vec<EffectivePermission> {
        self.catalog
            .iter()
            .map(|(key, default)| {
                let (attribute, source) = self.resolve(user, key, default);
                EffectivePermission {
                    service: key.service.clone(),
                    operation: key.operation.clone(),
                    attribute,
                    source,
                }
            })
            .collect()
    }

    fn resolve(&self, user: &str, key: &PermissionKey, default: Attribute) -> (Attribute, PermissionSource) {
        let direct = lookup(&self.user_overrides, user, key);
        if direct != Attribute::Default {
            return (direct, PermissionSource::User);
        }

        let mut any_allow = false;
        for group in self.groups_of(user) {
            match lookup(&self.group_overrides, group, key) {
                Attribute::Deny => return (Attribute::Deny, PermissionSource::Group),
                Attribute::Allow => any_allow = true,
                Attribute::Default => {}
            }
        }
        if any_allow {
            return (Attribute::Allow, PermissionSource::Group);
        }

        (default, PermissionSource::Default)
    }
}

fn lookup(overrides: &Overrides, subject: &str, key: &PermissionKey) -> Attribute {
    overrides
        .get(subject)
        .and_then(|entries| entries.get(key))
        .copied()
        .unwrap_or_default()
}

fn set_override(overrides: &mut Overrides, subject: &str, service: &str, operation: &str, attribute: Attribute) {
    if attribute == Attribute::Default {
        clear_override(overrides, subject, service, operation);
        return;
    }
    overrides
        .entry(subject.to_string())
        .or_default()
        .insert(PermissionKey::new(service, operation), attribute);
}

fn clear_override(overrides: &mut Overrides, subject: &str, service: &str, operation: &str) {
    if let Some(entries) = overrides.get_mut(subject) {
        entries.remove(&PermissionKey::new(service, operation));
        if entries.is_empty() {
            overrides.remove(subject);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SVC: &str = "ASSET_SVR";
    const OP: &str = "DOWNLOAD";

    fn resolver_with(default: Attribute) -> PermissionResolver {
        let mut catalog = Catalog::new();
        catalog.insert(SVC, OP, default);
        catalog.insert(SVC, "UPLOAD", Attribute::Deny);
        PermissionResolver::new(catalog)
    }

    #[test]
    fn test_catalog_default_applies_without_overrides() {
        assert!(resolver_with(Attribute::Allow).is_allowed("alice", SVC, OP));
        assert!(!resolver_with(Attribute::Deny).is_allowed("alice", SVC, OP));
    }

    #[test]
    fn test_catalog_default_of_default_is_denied() {
        assert!(!resolver_with(Attribute::Default).is_allowed("alice", SVC, OP));
    }

    #[test]
    fn test_user_override_beats_group_and_default() {
        let mut r = resolver_with(Attribute::Deny);
        r.add_membership("alice", "artists");
        r.set_group_override("artists", SVC, OP, Attribute::Deny);
        r.set_user_override("alice", SVC, OP, Attribute::Allow);
        assert!(r.is_allowed("alice", SVC, OP));
    }

    #[test]
    fn test_deny_overrides_allow_across_groups() {
        // Arrange: A allows, B denies, regardless of name order
        let mut r = resolver_with(Attribute::Allow);
        r.add_membership("bob", "a_allow");
        r.add_membership("bob", "b_deny");
        r.set_group_override("a_allow", SVC, OP, Attribute::Allow);
        r.set_group_override("b_deny", SVC, OP, Attribute::Deny);

        // Act / Assert
        assert!(!r.is_allowed("bob", SVC, OP));
    }

    #[test]
    fn test_group_allow_beats_catalog_deny() {
        let mut r = resolver_with(Attribute::Deny);
        r.add_membership("bob", "leads");
        r.add_membership("bob", "everyone");
        r.set_group_override("leads", SVC, OP, Attribute::Allow);
        assert!(r.is_allowed("bob", SVC, OP));
    }

    #[test]
    fn test_unknown_pair_denied_even_with_overrides() {
        let mut r = resolver_with(Attribute::Allow);
        r.add_membership("carol", "admins");
        r.set_user_override("carol", "BUILD_SVR", "LIST", Attribute::Allow);
        r.set_group_override("admins", "BUILD_SVR", "LIST", Attribute::Allow);
        assert!(!r.is_allowed("carol", "BUILD_SVR", "LIST"));
    }

    #[test]
    fn test_setting_default_clears_override() {
        let mut r = resolver_with(Attribute::Deny);
        r.set_user_override("alice", SVC, OP, Attribute::Allow);
        r.set_user_override("alice", SVC, OP, Attribute::Default);
        assert!(!r.is_allowed("alice", SVC, OP));
    }

    #[test]
    fn test_removed_membership_stops_contributing() {
        let mut r = resolver_with(Attribute::Deny);
        r.add_membership("bob", "leads");
        r.set_group_override("leads", SVC, OP, Attribute::Allow);
        r.remove_membership("bob", "leads");
        assert!(!r.is_allowed("bob", SVC, OP));
        assert_eq!(r.groups_of("bob").count(), 0);
    }

    #[test]
    fn test_effective_permissions_reports_sources() {
        let mut r = resolver_with(Attribute::Allow);
        r.add_membership("dave", "contractors");
        r.set_group_override("contractors", SVC, OP, Attribute::Deny);

        let listing = r.effective_permissions("dave");

        assert_eq!(listing.len(), 2);
        let download = listing.iter().find(|p| p.operation == OP).unwrap();
        assert_eq!(download.attribute, Attribute::Deny);
        assert_eq!(download.source, PermissionSource::Group);
        let upload = listing.iter().find(|p| p.operation == "UPLOAD").unwrap();
        assert_eq!(upload.source, PermissionSource::Default);
        assert!(!upload.allowed());
    }

    #[test]
    fn test_listing_agrees_with_is_allowed() {
        let mut r = resolver_with(Attribute::Default);
        r.add_membership("erin", "g1");
        r.set_group_override("g1", SVC, "UPLOAD", Attribute::Allow);
        for row in r.effective_permissions("erin") {
            assert_eq!(row.allowed(), r.is_allowed("erin", &row.service, &row.operation));
        }
    }

    #[test]
    fn test_catalog_from_records_rejects_duplicates() {
        let records = vec![
            (PermissionKey::new(SVC, OP), Attribute::Allow),
            (PermissionKey::new(SVC, OP), Attribute::Deny),
        ];
        assert!(matches!(
            Catalog::from_records(records),
            Err(CatalogError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_catalog_from_records_rejects_blank_names() {
        let records = vec![(PermissionKey::new("", OP), Attribute::Allow)];
        assert_eq!(Catalog::from_records(records).unwrap_err(), CatalogError::EmptyName);
    }
}

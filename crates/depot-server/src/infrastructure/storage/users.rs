//! User accounts from the `[[users]]` config section.

use std::collections::HashMap;

use depot_core::PermissionResolver;
use sha2::{Digest, Sha256};

use crate::application::auth::UserDirectory;
use crate::infrastructure::storage::config::{OverrideEntry, UserEntry};

/// Lowercase hex SHA-256 of `password`, the form stored in configuration.
pub fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

#[derive(Debug, Clone, Default)]
pub struct ConfiguredUsers {
    passwords: HashMap<String, String>,
    api_keys: HashMap<String, String>,
}

impl ConfiguredUsers {
    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut users = Self::default();
        for entry in entries {
            if let Some(hash) = &entry.password_sha256 {
                users
                    .passwords
                    .insert(entry.name.clone(), hash.to_ascii_lowercase());
            }
            if let Some(key) = &entry.api_key {
                users.api_keys.insert(key.clone(), entry.name.clone());
            }
        }
        users
    }
}

impl UserDirectory for ConfiguredUsers {
    fn verify_password(&self, user: &str, password: &str) -> bool {
        self.passwords
            .get(user)
            .is_some_and(|stored| *stored == hash_password(password))
    }

    fn user_for_api_key(&self, api_key: &str) -> Option<String> {
        if api_key.is_empty() {
            return None;
        }
        self.api_keys.get(api_key).cloned()
    }
}

/// Loads group memberships and overrides into `resolver`.
pub fn apply_grants(
    resolver: &mut PermissionResolver,
    users: &[UserEntry],
    user_overrides: &[OverrideEntry],
    group_overrides: &[OverrideEntry],
) {
    for user in users {
        for group in &user.groups {
            resolver.add_membership(&user.name, group);
        }
    }
    for o in user_overrides {
        resolver.set_user_override(&o.subject, &o.service, &o.operation, o.attribute);
    }
    for o in group_overrides {
        resolver.set_group_override(&o.subject, &o.service, &o.operation, o.attribute);
    }
}

//! The always-admin allow-list.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::handlers::users::normalize_email;

/// Addresses that are made admin on every sighting and can never be demoted or deleted.
///
/// Built once at startup from `auth.default_admin_email` and `auth.admin_emails`.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    emails: Arc<BTreeSet<String>>,
}

impl AdminPolicy {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|email| normalize_email(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect();
        Self { emails: Arc::new(emails) }
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        Self::new(std::iter::once(&auth.default_admin_email).chain(auth.admin_emails.iter()))
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.emails.contains(&normalize_email(email))
    }

    /// Sorted, normalised addresses. These are also the protected emails.
    pub fn emails(&self) -> Vec<String> {
        self.emails.iter().cloned().collect()
    }
}

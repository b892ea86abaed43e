//! Signed-in identity of the local operator.

use std::sync::RwLock;

use lanshare_core::IdentityProvider;

/// Holds the account label of whoever is signed in on this device.
/// Stands in for the web login: the console signs in and out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    current: RwLock<Option<String>>,
}

impl SessionIdentity {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            current: RwLock::new(initial.filter(|s| !s.trim().is_empty())),
        }
    }

    pub fn sign_in(&self, label: &str) {
        let label = label.trim();
        let mut cur = self.current.write().unwrap_or_else(|e| e.into_inner());
        *cur = (!label.is_empty()).then(|| label.to_string());
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_identity(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }
}

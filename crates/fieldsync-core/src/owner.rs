//! Authenticated owner resolution.

use std::sync::RwLock;

use crate::models::OwnerId;

/// Resolves the inspector currently signed in on this device.
pub trait OwnerProvider: Send + Sync {
    fn current_owner(&self) -> Option<OwnerId>;
}

/// Owner held in process memory, set at sign-in and cleared at sign-out.
#[derive(Debug, Default)]
pub struct SessionOwner {
    owner: RwLock<Option<OwnerId>>,
}

impl SessionOwner {
    pub fn new(owner: Option<OwnerId>) -> Self {
        Self {
            owner: RwLock::new(owner),
        }
    }

    pub fn sign_in(&self, owner: OwnerId) {
        let mut guard = self
            .owner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(owner);
    }

    pub fn sign_out(&self) {
        let mut guard = self
            .owner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }
}

impl OwnerProvider for SessionOwner {
    fn current_owner(&self) -> Option<OwnerId> {
        self.owner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

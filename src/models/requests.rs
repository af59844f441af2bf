//! Request DTOs for the gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::models::ProfileUpdate;

/// Maximum profile name length accepted by the gateway.
pub const MAX_NAME_LEN: usize = 64;

/// Request body for PATCH /profile/:id
///
/// Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UpdateProfileRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.name.is_none() && self.avatar_url.is_none() {
            return Some("Nothing to update".to_string());
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Some("Name cannot be empty".to_string());
            }
            if name.chars().count() > MAX_NAME_LEN {
                return Some(format!("Name exceeds maximum length of {} characters", MAX_NAME_LEN));
            }
        }
        None
    }

    pub fn into_update(self) -> ProfileUpdate {
        ProfileUpdate {
            name: self.name,
            avatar_url: self.avatar_url,
        }
    }
}

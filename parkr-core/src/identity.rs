use serde::{Deserialize, Serialize};
use std::fmt;

/// The signed-in user. The email doubles as the RFID token recorded on an occupied slot.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub email: String,
    pub name: String,
}

impl UserIdentity {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Token written to `Slot::rfid` when this user occupies a slot.
    pub fn rfid(&self) -> &str {
        &self.email
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("email", &parkr_shared::Masked(&self.email))
            .field("name", &self.name)
            .finish()
    }
}

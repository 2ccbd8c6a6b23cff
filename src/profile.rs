// profile.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;

/// Identity handed to us by the auth layer. Opaque to the chat server.
pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(ChatError::InvalidGender(other.to_string())),
        }
    }
}

/// Who a user wants to be paired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    Male,
    Female,
    #[default]
    Any,
}

impl Preference {
    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            Preference::Any => true,
            Preference::Male => gender == Gender::Male,
            Preference::Female => gender == Gender::Female,
        }
    }
}

/// Both sides must accept each other's gender.
pub fn compatible(a_gender: Gender, a_pref: Preference, b_gender: Gender, b_pref: Preference) -> bool {
    a_pref.accepts(b_gender) && b_pref.accepts(a_gender)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
}

impl UserProfile {
    pub fn new(id: &str, name: &str, gender: Gender) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            gender,
            age: None,
        }
    }
}

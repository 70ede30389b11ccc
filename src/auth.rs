//! Inbound authentication

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user: String,
    pub pass: String,
}

/// Parses `user:pass`; the password may itself contain colons.
impl FromStr for AuthUser {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, pass)) if !user.is_empty() => Ok(AuthUser {
                user: user.to_string(),
                pass: pass.to_string(),
            }),
            _ => Err(Error::ConfigParse(format!(
                "authentication entry {:?} is not user:pass",
                s
            ))),
        }
    }
}

#[derive(Debug)]
pub struct Authenticator {
    credentials: HashMap<String, String>,
    users: Vec<String>,
}

impl Authenticator {
    /// `None` when there are no users, meaning inbounds accept anyone.
    pub fn new(users: &[AuthUser]) -> Option<Self> {
        if users.is_empty() {
            return None;
        }

        let credentials = users
            .iter()
            .map(|u| (u.user.clone(), u.pass.clone()))
            .collect();
        let users = users.iter().map(|u| u.user.clone()).collect();
        Some(Self { credentials, users })
    }

    pub fn verify(&self, user: &str, pass: &str) -> bool {
        self.credentials.get(user).is_some_and(|p| p == pass)
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }
}

/// Render a credential as first char, `****`, last char; empty stays empty.
pub fn mask(credential: &str) -> String {
    let mut chars = credential.chars();
    match (chars.next(), chars.next_back()) {
        (None, _) => String::new(),
        (Some(first), None) => format!("{}****{}", first, first),
        (Some(first), Some(last)) => format!("{}****{}", first, last),
    }
}

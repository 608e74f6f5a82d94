//! Instance name prefixes.
//!
//! One short random token per instance, unique within the set, sorted and
//! then handed out by 1-based instance index.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use quark_core::{Error, Result};

pub const PREFIX_LEN: usize = 6;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePrefixes(Vec<String>);

impl InstancePrefixes {
    /// `count` unique random prefixes, sorted.
    pub fn generate<R: Rng>(count: usize, rng: &mut R) -> Self {
        let mut set = BTreeSet::new();
        while set.len() < count {
            set.insert(random_token(rng));
        }
        Self(set.into_iter().collect())
    }

    /// Use caller-supplied prefixes. Duplicates or empty tokens are rejected.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        let mut set = BTreeSet::new();
        for token in tokens {
            if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::validation(format!(
                    "instance prefix '{token}' must be a non-empty alphanumeric token"
                )));
            }
            if !set.insert(token.to_ascii_lowercase()) {
                return Err(Error::validation(format!("duplicate instance prefix '{token}'")));
            }
        }
        Ok(Self(set.into_iter().collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefix for the 1-based `index`.
    pub fn get(&self, index: u32) -> Result<&str> {
        let slot = (index as usize).checked_sub(1);
        slot.and_then(|i| self.0.get(i))
            .map(String::as_str)
            .ok_or_else(|| {
                Error::validation(format!(
                    "instance index {index} is outside 1..={}",
                    self.0.len()
                ))
            })
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

pub fn random_token<R: Rng>(rng: &mut R) -> String {
    (0..PREFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

//! Host consent categories
//!
//! The host application does not reason about numbered purposes. It keeps
//! five named switches, and the mapper in `tcf-codec` translates between the
//! two vocabularies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five fixed host categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Essential,
    Functional,
    Experience,
    Marketing,
    Measurement,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Essential,
        Category::Functional,
        Category::Experience,
        Category::Marketing,
        Category::Measurement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Essential => "essential",
            Category::Functional => "functional",
            Category::Experience => "experience",
            Category::Marketing => "marketing",
            Category::Measurement => "measurement",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown consent category '{}'", s))
    }
}

/// Five named consent booleans held by the host store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Categories {
    pub essential: bool,
    pub functional: bool,
    pub experience: bool,
    pub marketing: bool,
    pub measurement: bool,
}

impl Categories {
    /// Everything granted
    pub fn all_granted() -> Self {
        Self {
            essential: true,
            functional: true,
            experience: true,
            marketing: true,
            measurement: true,
        }
    }

    /// Only the essential category, which can never be refused
    pub fn essential_only() -> Self {
        Self {
            essential: true,
            ..Self::default()
        }
    }

    pub fn get(&self, category: Category) -> bool {
        match category {
            Category::Essential => self.essential,
            Category::Functional => self.functional,
            Category::Experience => self.experience,
            Category::Marketing => self.marketing,
            Category::Measurement => self.measurement,
        }
    }

    pub fn set(&mut self, category: Category, granted: bool) {
        match category {
            Category::Essential => self.essential = granted,
            Category::Functional => self.functional = granted,
            Category::Experience => self.experience = granted,
            Category::Marketing => self.marketing = granted,
            Category::Measurement => self.measurement = granted,
        }
    }

    pub fn with(mut self, category: Category, granted: bool) -> Self {
        self.set(category, granted);
        self
    }

    pub fn granted(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.into_iter().filter(|c| self.get(*c))
    }
}

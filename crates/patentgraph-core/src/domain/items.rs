//! Work items eligible for enrichment

use serde::{Deserialize, Serialize};

/// Which ledger partition an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Patent,
    Entity,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patent => "patent",
            Self::Entity => "entity",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A patent ready to be embedded in a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatentItem {
    pub patent_id: String,
    pub title: String,
    /// First 300 characters of the abstract
    pub abstract_excerpt: String,
    pub ipc_main_class: Option<String>,
    pub tech_domain_hint: Option<String>,
}

/// Coarse entity classification derived from the name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Company,
    IndividualOrOther,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::IndividualOrOther => "individual_or_other",
        }
    }
}

/// An applicant or owner whose location is to be extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityItem {
    pub normalized_name: String,
    pub display_name: String,
    pub entity_type: EntityType,
}

/// One unit of enrichment work, identified by its natural key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkItem {
    Patent(PatentItem),
    Entity(EntityItem),
}

impl WorkItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Patent(_) => ItemKind::Patent,
            Self::Entity(_) => ItemKind::Entity,
        }
    }

    /// Patent id or normalized entity name
    pub fn key(&self) -> &str {
        match self {
            Self::Patent(p) => &p.patent_id,
            Self::Entity(e) => &e.normalized_name,
        }
    }
}

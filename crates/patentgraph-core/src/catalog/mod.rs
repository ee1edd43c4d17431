//! Work catalog: every patent and entity eligible for enrichment
//!
//! Built once per run from the inbound records. Items keep the order of the
//! input so repeated scans against a growing ledger are stable.

mod normalize;
mod records;

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::domain::{EntityItem, ItemKind, PatentItem, WorkItem};
use crate::error::Result;
use crate::storage::DurableStore;

pub use normalize::{classify_entity, normalize_entity_name, split_names};
pub use records::{PatentRecord, load_records};

/// Maximum abstract length embedded in prompts, in characters
pub const ABSTRACT_EXCERPT_CHARS: usize = 300;

/// Counts of inbound records that did not become work items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub records: usize,
    pub missing_key: usize,
    pub missing_text: usize,
    pub duplicates: usize,
}

/// In-memory registry of work items
#[derive(Debug, Clone, Default)]
pub struct WorkCatalog {
    patents: Vec<PatentItem>,
    entities: Vec<EntityItem>,
    summary: LoadSummary,
}

impl WorkCatalog {
    /// Load records from `path` and derive items
    pub fn load(path: &Path) -> Result<Self> {
        let records = load_records(path)?;
        Ok(Self::from_records(records))
    }

    /// Derive patents and entities from already parsed records
    pub fn from_records(records: Vec<PatentRecord>) -> Self {
        let mut summary = LoadSummary {
            records: records.len(),
            ..LoadSummary::default()
        };
        let mut seen_patents = HashSet::new();
        let mut patents = Vec::new();
        let mut seen_entities = HashSet::new();
        let mut entities: Vec<EntityItem> = Vec::new();

        for record in records {
            let key = record.key().to_string();
            if key.is_empty() {
                summary.missing_key += 1;
                continue;
            }
            if !record.has_text() {
                summary.missing_text += 1;
                warn!(patent_id = %key, "Skipping record without title or abstract");
                continue;
            }
            if !seen_patents.insert(key.clone()) {
                summary.duplicates += 1;
                warn!(patent_id = %key, "Duplicate patent id, keeping first occurrence");
                continue;
            }

            let names = record
                .applicants
                .iter()
                .chain(record.current_owners.iter())
                .flat_map(|field| split_names(field));
            for display_name in names {
                let Some(normalized) = normalize_entity_name(&display_name) else {
                    continue;
                };
                if !seen_entities.insert(normalized.clone()) {
                    continue;
                }
                entities.push(EntityItem {
                    entity_type: classify_entity(&display_name),
                    normalized_name: normalized,
                    display_name,
                });
            }

            patents.push(PatentItem {
                patent_id: key,
                title: record.title.trim().to_string(),
                abstract_excerpt: excerpt(record.abstract_text.trim(), ABSTRACT_EXCERPT_CHARS),
                ipc_main_class: record.ipc_main_class.filter(|s| !s.trim().is_empty()),
                tech_domain_hint: record.tech_domain_hint.filter(|s| !s.trim().is_empty()),
            });
        }

        if summary.missing_key > 0 {
            warn!(count = summary.missing_key, "Skipped records without a patent id");
        }
        info!(
            patents = patents.len(),
            entities = entities.len(),
            skipped = summary.missing_key + summary.missing_text + summary.duplicates,
            "Built work catalog"
        );

        Self {
            patents,
            entities,
            summary,
        }
    }

    pub fn summary(&self) -> LoadSummary {
        self.summary
    }

    pub fn patents(&self) -> &[PatentItem] {
        &self.patents
    }

    pub fn entities(&self) -> &[EntityItem] {
        &self.entities
    }

    pub fn total_count(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Patent => self.patents.len(),
            ItemKind::Entity => self.entities.len(),
        }
    }

    /// Up to `limit` items not yet in the ledger, in input order
    pub fn unprocessed(&self, kind: ItemKind, limit: usize, store: &DurableStore) -> Vec<WorkItem> {
        self.unprocessed_excluding(kind, limit, store, &HashSet::new())
    }

    /// Like [`unprocessed`](Self::unprocessed), also skipping `excluded` keys
    pub fn unprocessed_excluding(
        &self,
        kind: ItemKind,
        limit: usize,
        store: &DurableStore,
        excluded: &HashSet<String>,
    ) -> Vec<WorkItem> {
        let pending = |key: &str| !excluded.contains(key) && !store.is_processed(kind, key);

        match kind {
            ItemKind::Patent => self
                .patents
                .iter()
                .filter(|p| pending(p.patent_id.as_str()))
                .take(limit)
                .cloned()
                .map(WorkItem::Patent)
                .collect(),
            ItemKind::Entity => self
                .entities
                .iter()
                .filter(|e| pending(e.normalized_name.as_str()))
                .take(limit)
                .cloned()
                .map(WorkItem::Entity)
                .collect(),
        }
    }
}

/// First `max_chars` characters of `text`
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;
    use tempfile::TempDir;

    fn record(id: &str, applicants: &[&str]) -> PatentRecord {
        PatentRecord {
            patent_id: id.to_string(),
            title: format!("标题{}", id),
            abstract_text: format!("摘要{}", id),
            applicants: applicants.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_skips_invalid_and_duplicate_records() {
        let mut no_text = record("CN3", &[]);
        no_text.abstract_text = String::new();

        let catalog = WorkCatalog::from_records(vec![
            record("CN1", &[]),
            record("", &[]),
            no_text,
            record("CN1", &[]),
            record("CN2", &[]),
        ]);

        assert_eq!(catalog.total_count(ItemKind::Patent), 2);
        let summary = catalog.summary();
        assert_eq!(summary.records, 5);
        assert_eq!(summary.missing_key, 1);
        assert_eq!(summary.missing_text, 1);
        assert_eq!(summary.duplicates, 1);
    }

    #[test]
    fn test_entities_are_deduplicated_by_normalized_name() {
        let mut second = record("CN2", &["亿华通股份有限公司"]);
        second.current_owners = vec!["亿华通有限公司; 清华大学".to_string()];

        let catalog =
            WorkCatalog::from_records(vec![record("CN1", &["亿华通股份有限公司", "张"]), second]);

        let names: Vec<&str> = catalog
            .entities()
            .iter()
            .map(|e| e.normalized_name.as_str())
            .collect();
        assert_eq!(names, vec!["亿华通", "清华大学"]);
        assert_eq!(catalog.entities()[0].display_name, "亿华通股份有限公司");
        assert_eq!(catalog.entities()[0].entity_type, EntityType::Company);
        assert_eq!(catalog.entities()[1].entity_type, EntityType::IndividualOrOther);
    }

    #[test]
    fn test_abstract_excerpt_counts_chars() {
        let mut long = record("CN1", &[]);
        long.abstract_text = "氢".repeat(400);
        let catalog = WorkCatalog::from_records(vec![long]);
        assert_eq!(catalog.patents()[0].abstract_excerpt.chars().count(), 300);
    }

    #[test]
    fn test_excerpt_short_text_unchanged() {
        assert_eq!(excerpt("abc", 300), "abc");
        assert_eq!(excerpt("氢能源", 2), "氢能");
    }

    #[test]
    fn test_unprocessed_shrinks_as_ledger_grows() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path(), "s1").unwrap();
        let catalog = WorkCatalog::from_records(
            (1..=5).map(|i| record(&format!("CN{}", i), &[])).collect(),
        );

        let first = catalog.unprocessed(ItemKind::Patent, 3, &store);
        let keys: Vec<&str> = first.iter().map(|item| item.key()).collect();
        assert_eq!(keys, vec!["CN1", "CN2", "CN3"]);

        store
            .mark_processed(ItemKind::Patent, keys.iter().map(|k| k.to_string()))
            .unwrap();

        let rest = catalog.unprocessed(ItemKind::Patent, 10, &store);
        let keys: Vec<&str> = rest.iter().map(|item| item.key()).collect();
        assert_eq!(keys, vec!["CN4", "CN5"]);
    }

    #[test]
    fn test_unprocessed_excluding() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path(), "s1").unwrap();
        let catalog = WorkCatalog::from_records(vec![record("CN1", &[]), record("CN2", &[])]);

        let excluded: HashSet<String> = ["CN1".to_string()].into_iter().collect();
        let items = catalog.unprocessed_excluding(ItemKind::Patent, 10, &store, &excluded);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key(), "CN2");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"[{"patent_id":"CN1","title":"t","abstract":"a","current_owners":["Plug Power Inc."]}]"#,
        )
        .unwrap();

        let catalog = WorkCatalog::load(&path).unwrap();
        assert_eq!(catalog.total_count(ItemKind::Patent), 1);
        assert_eq!(catalog.total_count(ItemKind::Entity), 1);
        assert_eq!(catalog.entities()[0].normalized_name, "PlugPower");
    }
}

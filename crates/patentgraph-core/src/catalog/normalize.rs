//! Entity name normalization

use crate::domain::EntityType;

/// Corporate suffixes, longest first; at most one is stripped
const CORPORATE_SUFFIXES: &[&str] = &[
    "有限责任公司",
    "股份有限公司",
    "有限公司",
    "Co.,Ltd.",
    "Co., Ltd.",
    "Co.,Ltd",
    "Co., Ltd",
    "Ltd.",
    "Ltd",
    "Inc.",
    "Inc",
    "Corp.",
    "Corp",
    "LIMITED",
    "CORPORATION",
    "INCORPORATED",
];

const COMPANY_MARKERS: &[&str] = &["公司", "Corp", "Ltd", "Inc"];

const BRACKETS: &[char] = &['（', '）', '(', ')', '【', '】', '[', ']', '《', '》', '<', '>'];

/// Separators used when several names share one field
const NAME_SEPARATORS: &[char] = &[';', ',', '、', '；'];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Natural key for an entity name, or `None` for names too short to be useful
///
/// Strips one corporate suffix, then whitespace and brackets. When that
/// leaves fewer than two characters the trimmed original name is kept.
pub fn normalize_entity_name(name: &str) -> Option<String> {
    let original = name.trim();
    if char_len(original) < 2 {
        return None;
    }

    let stem = CORPORATE_SUFFIXES
        .iter()
        .find_map(|suffix| original.strip_suffix(suffix))
        .map(str::trim)
        .unwrap_or(original);

    if char_len(stem) < 2 {
        return Some(original.to_string());
    }

    let cleaned: String = stem
        .chars()
        .filter(|c| !c.is_whitespace() && !BRACKETS.contains(c))
        .collect();

    if char_len(&cleaned) >= 2 {
        Some(cleaned)
    } else {
        Some(original.to_string())
    }
}

/// Coarse type from company markers in the display name
pub fn classify_entity(name: &str) -> EntityType {
    if COMPANY_MARKERS.iter().any(|marker| name.contains(marker)) {
        EntityType::Company
    } else {
        EntityType::IndividualOrOther
    }
}

/// Split a field that may list several names
///
/// Pieces shorter than two characters are dropped.
pub fn split_names(field: &str) -> Vec<String> {
    field
        .split(NAME_SEPARATORS)
        .map(str::trim)
        .filter(|piece| char_len(piece) >= 2)
        .map(str::to_string)
        .collect()
}

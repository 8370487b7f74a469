//! The fixed roster of tracked floats.
//!
//! Identifiers and display names are parallel, ordered lists: the identifier
//! at position `i` always belongs to the name at position `i`.

/// Number of floats in the parade.
pub const FLOAT_COUNT: usize = 18;

/// Float identifiers, used as document keys in the store.
pub const FLOAT_IDS: [&str; FLOAT_COUNT] = [
    "yama01", "yama02", "yama03", "yama04", "yama05", "yama06", "yama07", "yama08", "yama09",
    "yama10", "yama11", "yama12", "yama13", "yama14", "yama15", "yama16", "yama17", "yama18",
];

/// Float display names, in identifier order.
pub const FLOAT_NAMES: [&str; FLOAT_COUNT] = [
    "岩瀬",
    "西部",
    "駅前",
    "菅沢",
    "本町",
    "駅通り",
    "西勝楽",
    "桜美町",
    "七日町",
    "中央",
    "横町",
    "山根",
    "北部",
    "上新町",
    "下岩瀬",
    "東部",
    "大塚",
    "川原町",
];

/// A registered float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    /// Document key.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
}

/// All identifiers in registry order.
#[must_use]
pub fn ids() -> &'static [&'static str] {
    &FLOAT_IDS
}

/// All display names in registry order.
#[must_use]
pub fn names() -> &'static [&'static str] {
    &FLOAT_NAMES
}

/// Iterate over the registered floats in order.
pub fn entities() -> impl Iterator<Item = Entity> {
    FLOAT_IDS
        .iter()
        .zip(FLOAT_NAMES.iter())
        .map(|(&id, &name)| Entity { id, name })
}

/// Position of `id` in the registry.
#[must_use]
pub fn index_of(id: &str) -> Option<usize> {
    FLOAT_IDS.iter().position(|&candidate| candidate == id)
}

/// Display name for `id`.
#[must_use]
pub fn name_of(id: &str) -> Option<&'static str> {
    index_of(id).map(|i| FLOAT_NAMES[i])
}

/// Look up a registered float.
#[must_use]
pub fn lookup(id: &str) -> Option<Entity> {
    index_of(id).map(|i| Entity {
        id: FLOAT_IDS[i],
        name: FLOAT_NAMES[i],
    })
}

/// Check whether `id` is registered.
#[must_use]
pub fn contains(id: &str) -> bool {
    index_of(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_have_equal_length() {
        assert_eq!(ids().len(), FLOAT_COUNT);
        assert_eq!(names().len(), ids().len());
    }

    #[test]
    fn test_every_float_has_a_name() {
        for id in ids() {
            let name = name_of(id).unwrap();
            assert!(!name.is_empty(), "{id} has an empty name");
        }
    }

    #[test]
    fn test_ids_are_unique_and_zero_padded() {
        let mut seen = std::collections::HashSet::new();
        for (i, id) in ids().iter().enumerate() {
            assert!(seen.insert(*id));
            assert_eq!(*id, format!("yama{:02}", i + 1));
        }
    }

    #[test]
    fn test_index_and_name_correspond() {
        assert_eq!(index_of("yama01"), Some(0));
        assert_eq!(name_of("yama01"), Some("岩瀬"));
        assert_eq!(name_of("yama18"), Some("川原町"));
    }

    #[test]
    fn test_unknown_id() {
        assert!(!contains("yama19"));
        assert!(lookup("").is_none());
        assert!(name_of("YAMA01").is_none());
    }

    #[test]
    fn test_entities_in_order() {
        let all: Vec<Entity> = entities().collect();
        assert_eq!(all.len(), FLOAT_COUNT);
        assert_eq!(all[9], Entity { id: "yama10", name: "中央" });
        assert_eq!(lookup("yama10"), Some(all[9]));
    }
}

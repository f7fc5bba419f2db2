use std::collections::{BTreeMap, HashMap};
use serde::{Deserialize, Serialize};

/// Addresses a column role rather than a physical row: metadata describes
/// e.g. "every total row's Revenue cell", whichever fragment holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellPath {
    pub row_class: String,
    pub column: String,
}

impl CellPath {
    pub fn new(row_class: impl Into<String>, column: impl Into<String>) -> Self {
        CellPath {
            row_class: row_class.into(),
            column: column.into(),
        }
    }
}

/// Rendering hints attached by the producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMeta {
    pub format: Option<String>,
    pub drill_target: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl CellMeta {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_drill_target(mut self, target: impl Into<String>) -> Self {
        self.drill_target = Some(target.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct MetadataMap {
    entries: HashMap<CellPath, CellMeta>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous annotation for `path`.
    pub fn insert(&mut self, path: CellPath, meta: CellMeta) {
        self.entries.insert(path, meta);
    }

    pub fn get(&self, path: &CellPath) -> Option<&CellMeta> {
        self.entries.get(path)
    }

    /// Every annotation for one column label, across row classes
    pub fn for_column(&self, column: &str) -> Vec<(&CellPath, &CellMeta)> {
        let mut found: Vec<_> = self.entries.iter().filter(|(p, _)| p.column == column).collect();
        found.sort_by(|a, b| a.0.row_class.cmp(&b.0.row_class));
        found
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Sorted list form, as stored in snapshot manifests (JSON maps need string keys)
    pub fn to_entries(&self) -> Vec<(CellPath, CellMeta)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(p, m)| (p.clone(), m.clone())).collect();
        entries.sort_by(|a, b| (&a.0.row_class, &a.0.column).cmp(&(&b.0.row_class, &b.0.column)));
        entries
    }

    pub fn from_entries(entries: Vec<(CellPath, CellMeta)>) -> Self {
        MetadataMap {
            entries: entries.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_role_not_row() {
        let mut map = MetadataMap::new();
        map.insert(CellPath::new("total", "Revenue"), CellMeta::default().with_format("#,##0.00"));
        map.insert(CellPath::new("detail", "Revenue"), CellMeta::default().with_drill_target("orders"));
        map.insert(CellPath::new("detail", "Region"), CellMeta::default());

        let meta = map.get(&CellPath::new("total", "Revenue")).unwrap();
        assert_eq!(meta.format.as_deref(), Some("#,##0.00"));

        let revenue = map.for_column("Revenue");
        assert_eq!(revenue.len(), 2);
        assert_eq!(revenue[0].0.row_class, "detail");

        let restored = MetadataMap::from_entries(map.to_entries());
        assert_eq!(restored.len(), 3);
        assert_eq!(
            restored.get(&CellPath::new("detail", "Revenue")).and_then(|m| m.drill_target.clone()),
            Some("orders".to_string())
        );
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::filter::FilterExpr;

/// What to do with one field in a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Include(bool),
    /// Sub-selection applied to a populated relation
    Nested(Selection),
}

/// Field name to selector.
///
/// If any field is included, only included fields are returned; otherwise
/// every field except the excluded ones is. `id` is always returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(pub BTreeMap<String, Selector>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include each of `fields`
    pub fn of<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::new();
        for field in fields {
            selection.include(field);
        }
        selection
    }

    pub fn include(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), Selector::Include(true));
    }

    pub fn exclude(&mut self, field: impl Into<String>) {
        self.0.insert(field.into(), Selector::Include(false));
    }

    pub fn nest(&mut self, field: impl Into<String>, selection: Selection) {
        self.0.insert(field.into(), Selector::Nested(selection));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `field` ends up in the output
    pub fn selects(&self, field: &str) -> bool {
        if field == "id" {
            return true;
        }
        let whitelist = self
            .0
            .values()
            .any(|s| !matches!(s, Selector::Include(false)));
        match self.0.get(field) {
            Some(Selector::Include(included)) => *included,
            Some(Selector::Nested(_)) => true,
            None => !whitelist,
        }
    }

    pub fn nested(&self, field: &str) -> Option<&Selection> {
        match self.0.get(field) {
            Some(Selector::Nested(selection)) => Some(selection),
            _ => None,
        }
    }
}

/// Which relation fields to expand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PopulateSpec {
    /// Every relation and file field, at every level down to the depth bound
    All,
    /// Named fields, each with the populate spec for the records it expands into
    Fields(BTreeMap<String, PopulateSpec>),
}

impl PopulateSpec {
    /// Expand the named fields one level deep
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(
            fields
                .into_iter()
                .map(|f| (f.into(), Self::none()))
                .collect(),
        )
    }

    /// Expand nothing
    pub fn none() -> Self {
        Self::Fields(BTreeMap::new())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::Fields(fields) if fields.is_empty())
    }

    /// Spec for the records behind `field`, if that field is expanded.
    pub fn child(&self, field: &str) -> Option<&PopulateSpec> {
        match self {
            Self::All => Some(self),
            Self::Fields(fields) => fields.get(field),
        }
    }

    /// Levels this spec asks for; `None` for `All`.
    pub fn depth(&self) -> Option<u32> {
        match self {
            Self::All => None,
            Self::Fields(fields) => {
                let mut deepest = 0;
                for child in fields.values() {
                    deepest = deepest.max(1 + child.depth()?);
                }
                Some(deepest)
            }
        }
    }

    pub(crate) fn from_selection(selection: &Selection) -> Self {
        Self::Fields(
            selection
                .0
                .iter()
                .filter_map(|(field, selector)| match selector {
                    Selector::Include(false) => None,
                    Selector::Include(true) => Some((field.clone(), Self::none())),
                    Selector::Nested(inner) => Some((field.clone(), Self::from_selection(inner))),
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pagination {
    /// 1-based page number; `per_page` falls back to the configured default
    Page { page: u64, per_page: Option<u64> },
    Offset { offset: u64, limit: Option<u64> },
}

/// Accumulated query state. Compiled against the schema before it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    /// Implicitly AND-ed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterExpr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate: Option<PopulateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate_depth: Option<u32>,
    /// Record ids for point reads and mutations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl QueryDescriptor {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Fold `other` into `self`: filters are AND-ed, everything else set in
    /// `other` replaces what `self` had.
    pub fn merge(&mut self, other: QueryDescriptor) {
        self.filters.extend(other.filters);
        self.targets.extend(other.targets);
        if other.selection.is_some() {
            self.selection = other.selection;
        }
        if !other.sort.is_empty() {
            self.sort = other.sort;
        }
        if other.pagination.is_some() {
            self.pagination = other.pagination;
        }
        if other.populate.is_some() {
            self.populate = other.populate;
        }
        if other.populate_depth.is_some() {
            self.populate_depth = other.populate_depth;
        }
        if other.language.is_some() {
            self.language = other.language;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_whitelist_and_blacklist() {
        let selection = Selection::of(["title"]);
        assert!(selection.selects("title"));
        assert!(selection.selects("id"));
        assert!(!selection.selects("body"));

        let mut blacklist = Selection::new();
        blacklist.exclude("body");
        assert!(blacklist.selects("title"));
        assert!(!blacklist.selects("body"));
    }

    #[test]
    fn test_populate_depth() {
        let mut inner = BTreeMap::new();
        inner.insert("company".to_string(), PopulateSpec::none());
        let mut outer = BTreeMap::new();
        outer.insert("author".to_string(), PopulateSpec::Fields(inner));
        outer.insert("cover".to_string(), PopulateSpec::none());

        let spec = PopulateSpec::Fields(outer);
        assert_eq!(spec.depth(), Some(2));
        assert!(spec.child("author").is_some());
        assert!(spec.child("tags").is_none());
        assert_eq!(PopulateSpec::All.depth(), None);
        assert!(PopulateSpec::none().is_none());
    }
}

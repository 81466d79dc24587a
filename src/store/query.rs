use serde::{Deserialize, Serialize};

use super::UnitId;

/// Defines exactly which rows belong to a scan and how they are read. Every
/// field except `readonly` is an opaque fragment interpreted by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDescriptor {
    pub conditions: Option<String>,
    pub order: Option<String>,
    pub group: Option<String>,
    pub joins: Option<String>,
    pub include: Option<String>,
    pub select: Option<String>,
    pub readonly: bool,
}

impl ScanDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(mut self, conditions: impl Into<String>) -> Self {
        self.conditions = Some(conditions.into());
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn joins(mut self, joins: impl Into<String>) -> Self {
        self.joins = Some(joins.into());
        self
    }

    pub fn include(mut self, include: impl Into<String>) -> Self {
        self.include = Some(include.into());
        self
    }

    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Builds the paginated find issued by one refill.
    pub fn find_query(&self, limit: usize, offset: u64) -> FindQuery {
        FindQuery {
            conditions: self.conditions.clone(),
            order: self.order.clone(),
            group: self.group.clone(),
            joins: self.joins.clone(),
            include: self.include.clone(),
            select: self.select.clone(),
            readonly: self.readonly,
            limit,
            offset,
        }
    }

    /// Options workers pass along when hydrating a single id.
    pub fn hydrate_options(&self) -> HydrateOptions {
        HydrateOptions {
            include: self.include.clone(),
            readonly: self.readonly,
        }
    }
}

/// A single page request against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindQuery {
    pub conditions: Option<String>,
    pub order: Option<String>,
    pub group: Option<String>,
    pub joins: Option<String>,
    pub include: Option<String>,
    pub select: Option<String>,
    pub readonly: bool,
    pub limit: usize,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HydrateOptions {
    pub include: Option<String>,
    pub readonly: bool,
}

/// Convenience for stores that page over an ordered id list.
pub(crate) fn page_of(ids: &[UnitId], limit: usize, offset: u64) -> Vec<UnitId> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    ids.iter().skip(start).take(limit).copied().collect()
}

//! Write-target catalogue for synchronized leads.
//!
//! The lead table has a fixed set of columns. Every mapping entry resolves to
//! exactly one [`Destination`]: either a scalar [`LeadColumn`] with a declared
//! [`ValueKind`], or a [`DimensionKind`] whose foreign key is filled in later by
//! the entity resolver.

use serde::{Deserialize, Serialize};

// ============================================================================
// Value kinds
// ============================================================================

/// Destination type of a scalar lead column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Free text, trimmed and stripped of control characters
    Text,
    /// 64-bit signed integer
    Integer,
    /// Arbitrary JSON document
    Json,
}

/// Value written for a column when a record does not carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// Nullable column, written as NULL
    Null,
    /// Not-null text column
    Text(&'static str),
    /// Not-null integer column
    Integer(i64),
}

/// A scalar column of the lead table that a mapping may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadColumn {
    pub name: &'static str,
    pub kind: ValueKind,
    pub default: ColumnDefault,
    /// Maximum length in characters for text columns
    pub max_len: Option<usize>,
}

const fn text(name: &'static str, default: ColumnDefault, max_len: usize) -> LeadColumn {
    LeadColumn {
        name,
        kind: ValueKind::Text,
        default,
        max_len: Some(max_len),
    }
}

/// Mappable scalar columns of the lead table, in insert order.
pub const LEAD_COLUMNS: &[LeadColumn] = &[
    text("name", ColumnDefault::Text(""), 255),
    text("email", ColumnDefault::Null, 255),
    text("phone", ColumnDefault::Null, 50),
    text("whatsapp", ColumnDefault::Null, 50),
    text("company", ColumnDefault::Null, 255),
    text("city", ColumnDefault::Null, 100),
    text("status", ColumnDefault::Text("new"), 30),
    text("priority", ColumnDefault::Text("medium"), 20),
    LeadColumn {
        name: "budget",
        kind: ValueKind::Integer,
        default: ColumnDefault::Null,
        max_len: None,
    },
    LeadColumn {
        name: "score",
        kind: ValueKind::Integer,
        default: ColumnDefault::Integer(0),
        max_len: None,
    },
    text("notes", ColumnDefault::Null, 5000),
    LeadColumn {
        name: "custom_fields",
        kind: ValueKind::Json,
        default: ColumnDefault::Null,
        max_len: None,
    },
];

/// Look up a mappable lead column by name.
pub fn lead_column(name: &str) -> Option<&'static LeadColumn> {
    LEAD_COLUMNS.iter().find(|c| c.name == name)
}

// ============================================================================
// Dimension entities
// ============================================================================

/// Reference tables that a lead points to by foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Country,
    Campaign,
    CampaignGroup,
    Source,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 4] = [
        DimensionKind::Country,
        DimensionKind::Campaign,
        DimensionKind::CampaignGroup,
        DimensionKind::Source,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Country => "country",
            DimensionKind::Campaign => "campaign",
            DimensionKind::CampaignGroup => "campaign_group",
            DimensionKind::Source => "source",
        }
    }

    /// Storage table holding rows of this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            DimensionKind::Country => "countries",
            DimensionKind::Campaign => "campaigns",
            DimensionKind::CampaignGroup => "campaign_groups",
            DimensionKind::Source => "lead_sources",
        }
    }

    /// Foreign key column on the lead table.
    pub fn foreign_key(&self) -> &'static str {
        match self {
            DimensionKind::Country => "country_id",
            DimensionKind::Campaign => "campaign_id",
            DimensionKind::CampaignGroup => "campaign_group_id",
            DimensionKind::Source => "source_id",
        }
    }

    /// Pseudo-key under which the mapper stages the referenced name.
    pub fn staging_key(&self) -> &'static str {
        match self {
            DimensionKind::Country => "country_name",
            DimensionKind::Campaign => "campaign_name",
            DimensionKind::CampaignGroup => "campaign_group_name",
            DimensionKind::Source => "source_name",
        }
    }

    /// Maximum length of the generated short code, `None` when the kind has no code.
    pub fn code_max_len(&self) -> Option<usize> {
        match self {
            DimensionKind::Country => Some(3),
            DimensionKind::Campaign => Some(6),
            DimensionKind::CampaignGroup => None,
            DimensionKind::Source => Some(4),
        }
    }

    /// Countries carry a secondary-language name that is also matched on lookup.
    pub fn is_bilingual(&self) -> bool {
        matches!(self, DimensionKind::Country)
    }

    /// Resolve a mapping's internal field to a dimension kind.
    ///
    /// Accepts the bare kind (`country`), the foreign key (`country_id`) and
    /// the staging key (`country_name`).
    pub fn from_internal_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            field == kind.as_str() || field == kind.foreign_key() || field == kind.staging_key()
        })
    }
}

impl std::fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Destinations
// ============================================================================

/// Typed handler selected for a mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Column(&'static LeadColumn),
    Dimension(DimensionKind),
}

/// Resolve the destination of an internal field name.
///
/// Returns `None` for fields the lead table does not have.
pub fn destination_for(internal_field: &str) -> Option<Destination> {
    let field = internal_field.trim();
    if let Some(kind) = DimensionKind::from_internal_field(field) {
        return Some(Destination::Dimension(kind));
    }
    lead_column(field).map(Destination::Column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_for_dimension_aliases() {
        for field in ["country", "country_id", "country_name"] {
            assert_eq!(
                destination_for(field),
                Some(Destination::Dimension(DimensionKind::Country))
            );
        }
        assert_eq!(
            destination_for("campaign_group_id"),
            Some(Destination::Dimension(DimensionKind::CampaignGroup))
        );
    }

    #[test]
    fn test_destination_for_columns() {
        match destination_for("score") {
            Some(Destination::Column(col)) => {
                assert_eq!(col.kind, ValueKind::Integer);
                assert_eq!(col.default, ColumnDefault::Integer(0));
            }
            other => panic!("unexpected destination: {other:?}"),
        }
        assert!(destination_for("does_not_exist").is_none());
    }

    #[test]
    fn test_dimension_codes() {
        assert_eq!(DimensionKind::Country.code_max_len(), Some(3));
        assert_eq!(DimensionKind::CampaignGroup.code_max_len(), None);
        assert!(DimensionKind::Country.is_bilingual());
        assert!(!DimensionKind::Source.is_bilingual());
    }
}

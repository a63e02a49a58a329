use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::error::StatsError;

/// Separator between requested field names
pub const FIELD_DELIMITER: char = ',';

/// Every column a result can carry. Declaration order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Height,
    Time,
    MinFee,
    MaxFee,
    TotalFee,
    MinFeeRate,
    MaxFeeRate,
    AvgFee,
    AvgFeeRate,
    Txs,
    Ins,
    Outs,
}

impl Field {
    /// Columns present in every result; never parsed from a request
    pub const BASE: [Field; 2] = [Field::Height, Field::Time];

    /// Columns a request may select
    pub const CATALOG: [Field; 10] = [
        Field::MinFee,
        Field::MaxFee,
        Field::TotalFee,
        Field::MinFeeRate,
        Field::MaxFeeRate,
        Field::AvgFee,
        Field::AvgFeeRate,
        Field::Txs,
        Field::Ins,
        Field::Outs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Height => "height",
            Field::Time => "time",
            Field::MinFee => "minfee",
            Field::MaxFee => "maxfee",
            Field::TotalFee => "totalfee",
            Field::MinFeeRate => "minfeerate",
            Field::MaxFeeRate => "maxfeerate",
            Field::AvgFee => "avgfee",
            Field::AvgFeeRate => "avgfeerate",
            Field::Txs => "txs",
            Field::Ins => "ins",
            Field::Outs => "outs",
        }
    }

    /// Look a token up in the selectable catalog. Base columns are not found.
    pub fn from_catalog_name(token: &str) -> Option<Field> {
        Self::CATALOG.iter().copied().find(|f| f.name() == token)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The catalog columns selected by a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    selected: BTreeSet<Field>,
}

impl FieldSet {
    pub fn all() -> Self {
        FieldSet { selected: Field::CATALOG.into_iter().collect() }
    }

    pub fn contains(&self, field: Field) -> bool {
        self.selected.contains(&field)
    }

    /// Base columns followed by the selected catalog columns, in output order
    pub fn columns(&self) -> impl Iterator<Item = Field> + '_ {
        Field::BASE.into_iter().chain(self.selected.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Parse the requested field list.
///
/// `None` selects the whole catalog. Otherwise tokens are scanned in order
/// and the first one not in the catalog is reported; later tokens are not
/// looked at. Repeated tokens select once.
pub fn resolve(requested: Option<&str>) -> Result<FieldSet, StatsError> {
    let Some(requested) = requested else {
        return Ok(FieldSet::all());
    };

    let mut selected = BTreeSet::new();
    for token in requested.split(FIELD_DELIMITER) {
        match Field::from_catalog_name(token) {
            Some(field) => {
                selected.insert(field);
            }
            None => return Err(StatsError::InvalidField(token.to_string())),
        }
    }
    Ok(FieldSet { selected })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(r: Result<FieldSet, StatsError>) -> Option<String> {
        match r {
            Err(StatsError::InvalidField(t)) => Some(t),
            _ => None,
        }
    }

    #[test]
    fn test_absent_selects_catalog() {
        let set = resolve(None).unwrap();
        assert_eq!(set.len(), 10);
        assert_eq!(set.columns().count(), 12);
        assert_eq!(set.columns().next(), Some(Field::Height));
    }

    #[test]
    fn test_subset() {
        let set = resolve(Some("minfee,maxfee")).unwrap();
        let cols: Vec<_> = set.columns().map(|f| f.name()).collect();
        assert_eq!(cols, vec!["height", "time", "minfee", "maxfee"]);
    }

    #[test]
    fn test_output_order_ignores_request_order() {
        let set = resolve(Some("outs,minfee")).unwrap();
        let cols: Vec<_> = set.columns().collect();
        assert_eq!(cols, vec![Field::Height, Field::Time, Field::MinFee, Field::Outs]);
    }

    #[test]
    fn test_first_invalid_token_reported() {
        assert_eq!(invalid(resolve(Some("minfee,asdfghjkl"))).as_deref(), Some("asdfghjkl"));
        assert_eq!(invalid(resolve(Some("asdfghjkl,minfee"))).as_deref(), Some("asdfghjkl"));
        assert_eq!(invalid(resolve(Some("minfee,asdfghjkl,maxfee"))).as_deref(), Some("asdfghjkl"));
        assert_eq!(invalid(resolve(Some("minfee,first,second"))).as_deref(), Some("first"));
    }

    #[test]
    fn test_base_columns_not_selectable() {
        assert_eq!(invalid(resolve(Some("height"))).as_deref(), Some("height"));
        assert_eq!(invalid(resolve(Some("minfee,time"))).as_deref(), Some("time"));
    }

    #[test]
    fn test_exact_matching() {
        assert_eq!(invalid(resolve(Some("MinFee"))).as_deref(), Some("MinFee"));
        assert_eq!(invalid(resolve(Some("minfee, maxfee"))).as_deref(), Some(" maxfee"));
        assert_eq!(invalid(resolve(Some("minfee,"))).as_deref(), Some(""));
        assert_eq!(invalid(resolve(Some(""))).as_deref(), Some(""));
    }

    #[test]
    fn test_duplicates_idempotent() {
        assert_eq!(resolve(Some("minfee,minfee,maxfee")).unwrap(), resolve(Some("maxfee,minfee")).unwrap());
    }

    #[test]
    fn test_names_match_serde() {
        for field in Field::BASE.iter().chain(Field::CATALOG.iter()) {
            let json = serde_json::to_string(field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.name()));
        }
    }
}

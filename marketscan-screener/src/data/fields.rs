//! Canonical field keys and capability masks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column keys adapters use when mapping provider payloads.
///
/// The first group are fields of a [`super::CanonicalQuote`]; the rest are
/// inputs the normalizer derives canonical values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Field {
    Code = 0,
    Name,
    Price,
    ChangePct,
    VolumeRatio,
    TurnoverRate,
    Amount,
    PeRatio,
    MarketCap,
    Amplitude,
    Change60d,
    // Derivation inputs
    PrevClose,
    High,
    Low,
    Volume,
    LimitUpPrice,
    LimitDownPrice,
    StFlag,
    HaltedFlag,
}

impl Field {
    pub const fn bit(self) -> u32 {
        1u32 << (self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Name => "name",
            Self::Price => "price",
            Self::ChangePct => "change_pct",
            Self::VolumeRatio => "volume_ratio",
            Self::TurnoverRate => "turnover_rate",
            Self::Amount => "amount",
            Self::PeRatio => "pe_ratio",
            Self::MarketCap => "market_cap",
            Self::Amplitude => "amplitude",
            Self::Change60d => "change_60d",
            Self::PrevClose => "prev_close",
            Self::High => "high",
            Self::Low => "low",
            Self::Volume => "volume",
            Self::LimitUpPrice => "limit_up_price",
            Self::LimitDownPrice => "limit_down_price",
            Self::StFlag => "st_flag",
            Self::HaltedFlag => "halted_flag",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bit-set of canonical fields a provider can populate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldSet(u32);

impl FieldSet {
    pub const EMPTY: Self = Self(0);

    /// Identity, price, change% and traded amount.
    pub const BASIC: Self = Self::of(&[
        Field::Code,
        Field::Name,
        Field::Price,
        Field::ChangePct,
        Field::Amount,
    ]);

    /// Every canonical field.
    pub const FULL: Self = Self::BASIC.union(Self::of(&[
        Field::VolumeRatio,
        Field::TurnoverRate,
        Field::PeRatio,
        Field::MarketCap,
        Field::Amplitude,
        Field::Change60d,
    ]));

    pub const fn of(fields: &[Field]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < fields.len() {
            bits |= fields[i].bit();
            i += 1;
        }
        Self(bits)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, field: Field) -> Self {
        Self(self.0 & !field.bit())
    }

    pub const fn with(self, field: Field) -> Self {
        Self(self.0 | field.bit())
    }

    pub const fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Fields present in this set, in declaration order.
    pub fn fields(self) -> Vec<Field> {
        ALL_FIELDS
            .iter()
            .copied()
            .filter(|f| self.contains(*f))
            .collect()
    }
}

const ALL_FIELDS: [Field; 19] = [
    Field::Code,
    Field::Name,
    Field::Price,
    Field::ChangePct,
    Field::VolumeRatio,
    Field::TurnoverRate,
    Field::Amount,
    Field::PeRatio,
    Field::MarketCap,
    Field::Amplitude,
    Field::Change60d,
    Field::PrevClose,
    Field::High,
    Field::Low,
    Field::Volume,
    Field::LimitUpPrice,
    Field::LimitDownPrice,
    Field::StFlag,
    Field::HaltedFlag,
];

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields()).finish()
    }
}

impl Serialize for FieldSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.fields())
    }
}

impl FromIterator<Field> for FieldSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for field in iter {
            set.insert(field);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(FieldSet::BASIC.contains(Field::Price));
        assert!(!FieldSet::BASIC.contains(Field::VolumeRatio));
        assert!(FieldSet::FULL.contains(Field::VolumeRatio));
        assert!(FieldSet::FULL.contains(Field::Change60d));
        assert!(!FieldSet::FULL.contains(Field::PrevClose));
    }

    #[test]
    fn test_without() {
        let set = FieldSet::FULL.without(Field::Change60d);
        assert!(!set.contains(Field::Change60d));
        assert!(set.contains(Field::PeRatio));
    }

    #[test]
    fn test_collect_and_serialize() {
        let set: FieldSet = [Field::Price, Field::Code].into_iter().collect();
        assert_eq!(set.fields(), vec![Field::Code, Field::Price]);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["code","price"]"#);
    }
}

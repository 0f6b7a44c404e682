use std::{fmt::Display, str::FromStr};

use thiserror::Error;

/// An immutable set of optional grammar extensions.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct FeatureSet(u16);

impl FeatureSet {
    pub const VECTORS: FeatureSet = FeatureSet(1 << 0);
    pub const MULTI_MEMORY: FeatureSet = FeatureSet(1 << 1);
    pub const BULK_MEMORY: FeatureSet = FeatureSet(1 << 2);
    pub const REFERENCE_TYPES: FeatureSet = FeatureSet(1 << 3);
    pub const TYPED_FUNCTION_REFERENCES: FeatureSet = FeatureSet(1 << 4);
    pub const TYPE_IMPORTS: FeatureSet = FeatureSet(1 << 5);
    pub const ATOMICS: FeatureSet = FeatureSet(1 << 6);
    pub const REPEATED_SECTIONS: FeatureSet = FeatureSet(1 << 7);

    const NAMES: [(&'static str, FeatureSet); 8] = [
        ("vectors", Self::VECTORS),
        ("multi-memory", Self::MULTI_MEMORY),
        ("bulk-memory", Self::BULK_MEMORY),
        ("reference-types", Self::REFERENCE_TYPES),
        ("typed-function-references", Self::TYPED_FUNCTION_REFERENCES),
        ("type-imports", Self::TYPE_IMPORTS),
        ("atomics", Self::ATOMICS),
        ("repeated-sections", Self::REPEATED_SECTIONS),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0xff)
    }

    pub const fn contains(&self, other: FeatureSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: FeatureSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: FeatureSet) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn vectors(&self) -> bool {
        self.contains(Self::VECTORS)
    }

    pub fn multi_memory(&self) -> bool {
        self.contains(Self::MULTI_MEMORY)
    }

    pub fn bulk_memory(&self) -> bool {
        self.contains(Self::BULK_MEMORY)
    }

    pub fn reference_types(&self) -> bool {
        self.contains(Self::REFERENCE_TYPES)
    }

    pub fn typed_function_references(&self) -> bool {
        self.contains(Self::TYPED_FUNCTION_REFERENCES)
    }

    pub fn type_imports(&self) -> bool {
        self.contains(Self::TYPE_IMPORTS)
    }

    pub fn atomics(&self) -> bool {
        self.contains(Self::ATOMICS)
    }

    pub fn repeated_sections(&self) -> bool {
        self.contains(Self::REPEATED_SECTIONS)
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::VECTORS
            .with(Self::BULK_MEMORY)
            .with(Self::REFERENCE_TYPES)
    }
}

impl std::ops::BitOr for FeatureSet {
    type Output = FeatureSet;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.with(rhs)
    }
}

impl Display for FeatureSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, feature) in Self::NAMES {
            if !self.contains(feature) {
                continue;
            }
            if !first {
                f.write_str(",")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown feature \"{0}\"")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureSet {
    type Err = UnknownFeature;

    /// Parses a comma-separated list of feature names, e.g.
    /// `"bulk-memory,reference-types"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut features = FeatureSet::empty();
        for name in s.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            let Some((_, feature)) = Self::NAMES.iter().find(|(known, _)| *known == name) else {
                return Err(UnknownFeature(name.to_string()));
            };
            features = features.with(*feature);
        }
        Ok(features)
    }
}

/// Per-construct ceilings consulted by every counted or sized read.
///
/// The defaults are aligned with the limits mainstream engines enforce.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Limits {
    pub max_types: u32,
    pub max_imports: u32,
    pub max_functions: u32,
    pub max_tables: u32,
    pub max_memories: u32,
    pub max_globals: u32,
    pub max_exports: u32,
    pub max_table_entries: u32,
    pub max_element_segments: u32,
    pub max_data_segments: u32,
    pub max_module_size: u32,
    pub max_function_size: u32,
    pub max_params: u32,
    pub max_results: u32,
    pub max_locals: u32,
    pub max_br_table_entries: u32,
    pub max_select_types: u32,
    pub max_memory_pages: u32,
    pub max_table_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_types: 1_000_000,
            max_imports: 1_000_000,
            max_functions: 1_000_000,
            max_tables: 100_000,
            max_memories: 100,
            max_globals: 1_000_000,
            max_exports: 1_000_000,
            max_table_entries: 10_000_000,
            max_element_segments: 100_000,
            max_data_segments: 100_000,
            max_module_size: 1024 * 1024 * 1024,
            max_function_size: 7_654_321,
            max_params: 1_000,
            max_results: 1_000,
            max_locals: 50_000,
            max_br_table_entries: 65_536,
            max_select_types: 1_000,
            max_memory_pages: 65_536,
            max_table_size: 10_000_000,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct DecoderConfig {
    pub features: FeatureSet,
    pub limits: Limits,
}

impl DecoderConfig {
    pub fn new(features: FeatureSet, limits: Limits) -> Self {
        Self { features, limits }
    }

    pub fn with_features(self, features: FeatureSet) -> Self {
        Self { features, ..self }
    }

    pub fn with_limits(self, limits: Limits) -> Self {
        Self { limits, ..self }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn features_round_trip_through_names() -> Result<(), UnknownFeature> {
        let features: FeatureSet = "bulk-memory, atomics,multi-memory".parse()?;
        assert!(features.bulk_memory());
        assert!(features.atomics());
        assert!(features.multi_memory());
        assert!(!features.vectors());
        assert_eq!(features.to_string(), "multi-memory,bulk-memory,atomics");
        Ok(())
    }

    #[test]
    fn unknown_features_are_rejected() {
        assert_eq!(
            "vectors,gc".parse::<FeatureSet>(),
            Err(UnknownFeature("gc".to_string()))
        );
    }

    #[test]
    fn without_clears_only_the_named_bit() {
        let features = FeatureSet::all().without(FeatureSet::ATOMICS);
        assert!(!features.atomics());
        assert!(features.repeated_sections());
        assert!(FeatureSet::empty().is_empty());
    }
}

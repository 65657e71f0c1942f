use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Semantic category of one depth of the archive tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Institution,
    Model,
    Experiment,
    FrequencyDomain,
    Realm,
    FrequencyName,
    Ensemble,
    Table,
    Variable,
    GridLabel,
    Version,
    File,
}

impl LevelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelKind::Institution => "institution",
            LevelKind::Model => "model",
            LevelKind::Experiment => "experiment",
            LevelKind::FrequencyDomain => "frequency_domain",
            LevelKind::Realm => "realm",
            LevelKind::FrequencyName => "frequency_name",
            LevelKind::Ensemble => "ensemble",
            LevelKind::Table => "table",
            LevelKind::Variable => "variable",
            LevelKind::GridLabel => "grid_label",
            LevelKind::Version => "version",
            LevelKind::File => "file",
        }
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LevelKind {
    type Err = InventoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let kind = match normalized.as_str() {
            "institution" => LevelKind::Institution,
            "model" => LevelKind::Model,
            "experiment" => LevelKind::Experiment,
            "frequency_domain" | "freq" => LevelKind::FrequencyDomain,
            "realm" => LevelKind::Realm,
            "frequency_name" | "freq_name" => LevelKind::FrequencyName,
            "ensemble" | "simulation" => LevelKind::Ensemble,
            "table" => LevelKind::Table,
            "variable" => LevelKind::Variable,
            "grid_label" | "grid" => LevelKind::GridLabel,
            "version" => LevelKind::Version,
            "file" => LevelKind::File,
            _ => return Err(InventoryError::InvalidLevel(value.to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveLayout {
    Ccmi1,
    Ccmi2022,
}

impl ArchiveLayout {
    pub fn levels(self) -> Vec<LevelKind> {
        match self {
            ArchiveLayout::Ccmi1 => vec![
                LevelKind::Institution,
                LevelKind::Model,
                LevelKind::Experiment,
                LevelKind::FrequencyDomain,
                LevelKind::Realm,
                LevelKind::FrequencyName,
                LevelKind::Ensemble,
                LevelKind::Version,
                LevelKind::Variable,
                LevelKind::File,
            ],
            ArchiveLayout::Ccmi2022 => vec![
                LevelKind::Institution,
                LevelKind::Model,
                LevelKind::Experiment,
                LevelKind::Ensemble,
                LevelKind::Table,
                LevelKind::Variable,
                LevelKind::GridLabel,
                LevelKind::Version,
                LevelKind::File,
            ],
        }
    }

    pub fn default_catalog_root(self) -> &'static str {
        match self {
            ArchiveLayout::Ccmi1 => {
                "https://dap.ceda.ac.uk/thredds/badc/wcrp-ccmi/data/CCMI-1/output/"
            }
            ArchiveLayout::Ccmi2022 => {
                "https://dap.ceda.ac.uk/thredds/badc/ccmi/data/post-cmip6/ccmi-2022/"
            }
        }
    }

    pub fn default_ftp_root(self) -> &'static str {
        match self {
            ArchiveLayout::Ccmi1 => "/badc/wcrp-ccmi/data/CCMI-1/output",
            ArchiveLayout::Ccmi2022 => "/badc/ccmi/data/post-cmip6/ccmi-2022",
        }
    }

    /// Prefix for artifact file names (inventory snapshots, search logs).
    pub fn label(self) -> &'static str {
        match self {
            ArchiveLayout::Ccmi1 => "CCMI-1",
            ArchiveLayout::Ccmi2022 => "CCMI-2022",
        }
    }
}

impl fmt::Display for ArchiveLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveLayout::Ccmi1 => write!(f, "ccmi1"),
            ArchiveLayout::Ccmi2022 => write!(f, "ccmi2022"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Thredds,
    Ftp,
}

pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://dap.ceda.ac.uk/";
pub const DEFAULT_FTP_HOST: &str = "ftp.ceda.ac.uk";

/// Accepted values per constrained level. Levels absent from the map accept
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    constraints: BTreeMap<LevelKind, BTreeSet<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, kind: LevelKind, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend(kind, values);
        self
    }

    pub fn extend<I, S>(&mut self, kind: LevelKind, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.constraints.entry(kind).or_default();
        entry.extend(values.into_iter().map(Into::into));
    }

    /// Adds `<variable>_<table>` targets, e.g. `h2o_AmonZ`.
    pub fn add_target(&mut self, target: &str) -> Result<(), InventoryError> {
        let (variable, table) = split_target(target)?;
        self.extend(LevelKind::Variable, [variable]);
        self.extend(LevelKind::Table, [table]);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn accepts(&self, kind: LevelKind, name: &str) -> bool {
        match self.constraints.get(&kind) {
            Some(values) => values.contains(name),
            None => true,
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = LevelKind> + '_ {
        self.constraints.keys().copied()
    }

    /// Constraints on levels the layout does not have can never match.
    pub fn validate(&self, levels: &[LevelKind]) -> Result<(), InventoryError> {
        for kind in self.levels() {
            if !levels.contains(&kind) {
                return Err(InventoryError::InvalidFilter(format!(
                    "level {kind} is not part of this archive layout"
                )));
            }
            if kind == LevelKind::File {
                return Err(InventoryError::InvalidFilter(
                    "file names cannot be filtered".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn split_target(target: &str) -> Result<(String, String), InventoryError> {
    let trimmed = target.trim();
    let mut parts = trimmed.split('_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(variable), Some(table), None) if !variable.is_empty() && !table.is_empty() => {
            Ok((variable.to_string(), table.to_string()))
        }
        _ => Err(InventoryError::InvalidFilter(format!(
            "target must look like <variable>_<table>: {target}"
        ))),
    }
}

/// Frequency-name directory used by the CCMI-1 layout for a frequency domain.
pub fn frequency_name(domain: &str) -> Option<&'static str> {
    match domain {
        "fx" => Some("fixed"),
        "day" => Some("daily"),
        "mon" => Some("monthly"),
        "yr" => Some("annual"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_level_kind() {
        assert_eq!("Experiment".parse::<LevelKind>().unwrap(), LevelKind::Experiment);
        assert_eq!("grid-label".parse::<LevelKind>().unwrap(), LevelKind::GridLabel);
        let err = "planet".parse::<LevelKind>().unwrap_err();
        assert_matches!(err, InventoryError::InvalidLevel(_));
    }

    #[test]
    fn layouts_end_in_files() {
        for layout in [ArchiveLayout::Ccmi1, ArchiveLayout::Ccmi2022] {
            assert_eq!(layout.levels().last(), Some(&LevelKind::File));
        }
    }

    #[test]
    fn target_expands_into_variable_and_table() {
        let mut filter = Filter::new();
        filter.add_target("h2o_AmonZ").unwrap();
        assert!(filter.accepts(LevelKind::Variable, "h2o"));
        assert!(filter.accepts(LevelKind::Table, "AmonZ"));
        assert!(!filter.accepts(LevelKind::Table, "Amon"));
        assert!(filter.accepts(LevelKind::Experiment, "anything"));

        let err = filter.add_target("h2o").unwrap_err();
        assert_matches!(err, InventoryError::InvalidFilter(_));
    }

    #[test]
    fn filter_rejects_levels_outside_layout() {
        let filter = Filter::new().with(LevelKind::Table, ["Amon"]);
        assert!(filter.validate(&ArchiveLayout::Ccmi2022.levels()).is_ok());
        assert_matches!(
            filter.validate(&ArchiveLayout::Ccmi1.levels()),
            Err(InventoryError::InvalidFilter(_))
        );
    }
}

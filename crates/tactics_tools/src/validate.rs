//! Data validation utilities.
//!
//! A data directory holds RON files whose root is either a `CatalogData`
//! or a `BattlefieldConfig`. Each file is checked on its own, then every
//! battlefield is checked against the catalog.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tactics_core::catalog::{CatalogData, SiteRequirement};
use tactics_core::config::BattlefieldConfig;

use crate::{Result, ToolError};

/// What a data file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataKind {
    /// Unit and building types.
    Catalog,
    /// Grid, veins, and player setup.
    Battlefield,
    /// Root type not recognized.
    Unknown,
}

/// Findings for one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// File path, or a label for inline sources.
    pub path: String,
    /// Detected root type.
    pub kind: DataKind,
    /// Problems found; empty when the file is valid.
    pub problems: Vec<String>,
}

impl FileReport {
    fn new(path: impl Into<String>, kind: DataKind) -> Self {
        Self {
            path: path.into(),
            kind,
            problems: Vec::new(),
        }
    }
}

/// Findings for a whole data directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// One entry per RON file, sorted by path.
    pub files: Vec<FileReport>,
    /// Problems that involve more than one file.
    pub cross_file: Vec<String>,
}

impl ValidationReport {
    /// Total number of problems.
    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.files.iter().map(|f| f.problems.len()).sum::<usize>() + self.cross_file.len()
    }

    /// Whether no problems were found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problem_count() == 0
    }

    /// Render the report as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Turn a report with problems into [`ToolError::ValidationFailed`].
    pub fn into_result(self) -> Result<Self> {
        match self.problem_count() {
            0 => Ok(self),
            count => Err(ToolError::ValidationFailed(count)),
        }
    }
}

/// Guess the root type from the first identifier in the source.
#[must_use]
pub fn detect_kind(source: &str) -> DataKind {
    let body = source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with("#!"))
        .collect::<Vec<_>>()
        .join(" ");
    if body.starts_with("CatalogData") {
        DataKind::Catalog
    } else if body.starts_with("BattlefieldConfig") {
        DataKind::Battlefield
    } else {
        DataKind::Unknown
    }
}

/// Check a catalog source.
///
/// Returns the parsed data (when it parses) alongside the report.
#[must_use]
pub fn validate_catalog_str(source: &str, label: &str) -> (FileReport, Option<CatalogData>) {
    let mut report = FileReport::new(label, DataKind::Catalog);
    match CatalogData::from_ron_str(source, label) {
        Ok(data) => {
            report.problems = data.problems();
            (report, Some(data))
        }
        Err(e) => {
            report.problems.push(e.to_string());
            (report, None)
        }
    }
}

/// Check a battlefield config source.
#[must_use]
pub fn validate_config_str(source: &str, label: &str) -> (FileReport, Option<BattlefieldConfig>) {
    let mut report = FileReport::new(label, DataKind::Battlefield);
    match BattlefieldConfig::from_ron_str(source, label) {
        Ok(config) => {
            report.problems = config.problems();
            (report, Some(config))
        }
        Err(e) => {
            report.problems.push(e.to_string());
            (report, None)
        }
    }
}

/// Problems between a catalog and a battlefield that are each valid alone.
///
/// Vein-site buildings need at least one vein, and every vein must match the
/// footprint of some vein-site building exactly or it can never be covered.
#[must_use]
pub fn cross_check(catalog: &CatalogData, config: &BattlefieldConfig, label: &str) -> Vec<String> {
    let extractors: Vec<_> = catalog
        .buildings
        .iter()
        .filter(|b| b.site == SiteRequirement::ResourceVein)
        .collect();

    let mut problems = Vec::new();
    if !extractors.is_empty() && config.veins.is_empty() {
        problems.push(format!(
            "{label}: no resource veins, so '{}' can never be placed",
            extractors[0].name
        ));
    }
    for (index, vein) in config.veins.iter().enumerate() {
        let fits = extractors
            .iter()
            .any(|b| b.footprint.width == vein.width && b.footprint.depth == vein.depth);
        if !fits {
            problems.push(format!(
                "{label}: vein {index} at ({}, {}) is {}x{} but no vein-site building has that footprint",
                vein.x, vein.z, vein.width, vein.depth
            ));
        }
    }
    problems
}

fn ron_files(path: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(path).map_err(|e| ToolError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ToolError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file = entry.path();
        if file.extension().is_some_and(|ext| ext == "ron") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Validate all RON data files in a directory.
///
/// Unreadable directories and files are errors; problems inside readable
/// files are collected in the report. A directory without a catalog is
/// itself a problem.
pub fn validate_data_directory(path: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let mut catalogs = Vec::new();
    let mut configs = Vec::new();

    for file in ron_files(path)? {
        let label = file.display().to_string();
        let source = std::fs::read_to_string(&file).map_err(|e| ToolError::Io {
            path: label.clone(),
            message: e.to_string(),
        })?;

        let file_report = match detect_kind(&source) {
            DataKind::Catalog => {
                let (file_report, data) = validate_catalog_str(&source, &label);
                catalogs.extend(data);
                file_report
            }
            DataKind::Battlefield => {
                let (file_report, config) = validate_config_str(&source, &label);
                configs.extend(config.map(|c| (label.clone(), c)));
                file_report
            }
            DataKind::Unknown => {
                let mut file_report = FileReport::new(label.clone(), DataKind::Unknown);
                file_report
                    .problems
                    .push("root is neither CatalogData nor BattlefieldConfig".to_string());
                file_report
            }
        };
        tracing::debug!(
            file = %file_report.path,
            kind = ?file_report.kind,
            problems = file_report.problems.len(),
            "Checked data file"
        );
        report.files.push(file_report);
    }

    match catalogs.as_slice() {
        [] => report
            .cross_file
            .push(format!("no catalog found in {}", path.display())),
        [catalog] => {
            for (label, config) in &configs {
                report.cross_file.extend(cross_check(catalog, config, label));
            }
        }
        _ => report
            .cross_file
            .push(format!("{} catalogs found, expected one", catalogs.len())),
    }

    tracing::info!(
        files = report.files.len(),
        problems = report.problem_count(),
        "Validated data directory"
    );
    Ok(report)
}

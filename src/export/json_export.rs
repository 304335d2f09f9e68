use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::export::{ChangeReport, Exporter, FusionReport};

pub const FUSION_REPORT_FILE: &str = "detections.json";
pub const CHANGE_REPORT_FILE: &str = "changes.json";

#[derive(Debug, Clone)]
pub struct JsonExporter {
    out_dir: PathBuf,
}

impl JsonExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    /// Writes any serializable value as pretty JSON under the output directory.
    pub fn write<T: Serialize>(&self, file_name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.out_dir.join(file_name);
        let data = serde_json::to_string_pretty(value)?;
        fs::write(&path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl Exporter for JsonExporter {
    fn export_fusion(&self, report: &FusionReport) -> Result<()> {
        self.write(FUSION_REPORT_FILE, report)
    }

    fn export_changes(&self, report: &ChangeReport) -> Result<()> {
        self.write(CHANGE_REPORT_FILE, report)
    }
}

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::core::model::{ChangeRecord, FusedDetection};
use crate::export::{ChangeReport, Exporter, FusionReport};

/// Plain-text triage listings, one line per record.
#[derive(Debug, Clone)]
pub struct TextExporter {
    out_dir: PathBuf,
}

impl TextExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    fn format_detection(rank: usize, det: &FusedDetection) -> String {
        format!(
            "{rank:>3}. [sev {:>2}] {:<14} conf {:.2} ({:?}) at x:{:.0} y:{:.0} w:{:.0} h:{:.0}  {}",
            det.severity,
            det.defect_type,
            det.combined_confidence,
            det.provenance,
            det.bbox.x0,
            det.bbox.y0,
            det.bbox.width(),
            det.bbox.height(),
            det.detection_id,
        )
    }

    fn format_change(change: &ChangeRecord) -> String {
        let subject = change.after.as_ref().or(change.before.as_ref());
        let mut line = format!("{:<22}", change.change_type.as_str());
        if let Some(det) = subject {
            let _ = write!(line, " {:<14} sev {:>2}", det.class_name, det.severity);
        }
        if let Some(delta) = change.severity_delta {
            let _ = write!(line, " (delta {delta:+})");
        }
        if let Some(spectral) = &change.spectral {
            let _ = write!(line, " corroborated by {}", spectral.candidate_id);
        }
        line
    }
}

impl Exporter for TextExporter {
    fn export_fusion(&self, report: &FusionReport) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;

        let mut text = String::new();
        let _ = writeln!(
            text,
            "=== Triage ({} detections: {} fused, {} visual-only, {} spectral-only) ===\n",
            report.summary.total,
            report.summary.fused,
            report.summary.visual_only,
            report.summary.spectral_only,
        );
        for (idx, det) in report.detections.iter().enumerate() {
            text.push_str(&Self::format_detection(idx + 1, det));
            text.push('\n');
        }

        fs::write(self.out_dir.join("triage.txt"), text)?;
        Ok(())
    }

    fn export_changes(&self, report: &ChangeReport) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;

        let summary = &report.summary;
        let mut text = String::new();
        let _ = writeln!(text, "=== Changes ({}) ===", summary.total);
        let _ = writeln!(
            text,
            "new_damage {} | possible_repair {} | infrastructure_loss {} | condition_deteriorated {} | corroborated {}\n",
            summary.new_damage,
            summary.possible_repair,
            summary.infrastructure_loss,
            summary.condition_deteriorated,
            summary.corroborated,
        );
        for change in &report.changes {
            text.push_str(&Self::format_change(change));
            text.push('\n');
        }

        fs::write(self.out_dir.join("changes.txt"), text)?;
        Ok(())
    }
}

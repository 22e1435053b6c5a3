//! Parsing the simulator's output report into per-organism fitness.
//!
//! The report root carries a `detail` section with one record per organism,
//! tagged `<label>_<id>`, each holding a `fitness_score` value. Any missing
//! or malformed piece fails the whole generation; this layer never returns
//! a partial report or substitutes a default fitness.

use crate::generation::{GenerationDir, REPORT_FILE};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Fitness score per organism id, in id order.
pub type FitnessReport = BTreeMap<String, f64>;

/// Failures while reading or interpreting the simulator report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report file {path} is missing")]
    Missing { path: PathBuf },
    #[error("failed to read report file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("report is not well-formed XML: {0}")]
    Malformed(#[from] roxmltree::Error),
    #[error("report has no detail section")]
    NoDetailSection,
    #[error("record tag {0:?} does not follow the <label>_<id> form")]
    BadRecordTag(String),
    #[error("record {0:?} has no fitness_score value")]
    MissingFitness(String),
    #[error("record {tag:?} fitness {value:?} is not a number")]
    BadFitness { tag: String, value: String },
    #[error("record {tag:?} names organism {id:?}, which has no staged descriptor")]
    UnknownOrganism { tag: String, id: String },
}

/// Parse `results.xml` from a staged generation into a [`FitnessReport`].
///
/// Every record id must match a descriptor actually written into this
/// generation; an unmatched id is a parse error, not a silent drop.
pub fn parse_report(generation: &GenerationDir) -> Result<FitnessReport, ReportError> {
    let path = generation.path().join(REPORT_FILE);
    let text = fs::read_to_string(&path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ReportError::Missing { path: path.clone() }
        } else {
            ReportError::Io {
                path: path.clone(),
                source,
            }
        }
    })?;
    let document = roxmltree::Document::parse(&text)?;
    let detail = document
        .descendants()
        .find(|node| node.has_tag_name("detail"))
        .ok_or(ReportError::NoDetailSection)?;

    let mut report = FitnessReport::new();
    for record in detail.children().filter(|node| node.is_element()) {
        let tag = record.tag_name().name().to_string();
        let id = tag
            .rsplit_once('_')
            .map(|(_, id)| id.to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReportError::BadRecordTag(tag.clone()))?;
        if !generation.descriptor_ids().contains(&id) {
            return Err(ReportError::UnknownOrganism { tag, id });
        }
        let value = record
            .children()
            .find(|node| node.has_tag_name("fitness_score"))
            .and_then(|node| node.text())
            .ok_or_else(|| ReportError::MissingFitness(tag.clone()))?;
        let fitness = value
            .trim()
            .parse::<f64>()
            .map_err(|_| ReportError::BadFitness {
                tag: tag.clone(),
                value: value.to_string(),
            })?;
        report.insert(id, fitness);
    }
    debug!(path = %path.display(), organisms = report.len(), "parsed fitness report");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::{Morphology, encode_morphology};
    use crate::settings::SimulationSettings;
    use std::path::Path;
    use tempfile::tempdir;

    fn staged_with_ids(root: &Path, ids: &[u32]) -> GenerationDir {
        let settings = SimulationSettings::with_default_materials(0.5, 2.0).expect("settings");
        let mut generation = GenerationDir::stage(root, "gen_0000", &settings).expect("stage");
        let mut morphology = Morphology::zeros((1, 1, 1));
        morphology[[0, 0, 0]] = 1;
        for &id in ids {
            encode_morphology(settings.palette(), &mut generation, &morphology, "ind", id, 0)
                .expect("encode");
        }
        generation
    }

    fn write_report(generation: &GenerationDir, body: &str) {
        fs::write(generation.path().join(REPORT_FILE), body).expect("write report");
    }

    #[test]
    fn parses_ids_and_fitness_values() {
        let root = tempdir().expect("tempdir");
        let generation = staged_with_ids(root.path(), &[3, 7]);
        write_report(
            &generation,
            "<report><detail>\
             <ind_3><fitness_score>1.25</fitness_score></ind_3>\
             <ind_7><fitness_score>-0.5</fitness_score></ind_7>\
             </detail></report>",
        );
        let report = parse_report(&generation).expect("parse");
        assert_eq!(report.len(), 2);
        assert_eq!(report["3"], 1.25);
        assert_eq!(report["7"], -0.5);
    }

    #[test]
    fn missing_report_file_is_a_distinct_error() {
        let root = tempdir().expect("tempdir");
        let generation = staged_with_ids(root.path(), &[0]);
        let err = parse_report(&generation).expect_err("missing report");
        assert!(matches!(err, ReportError::Missing { .. }));
    }

    #[test]
    fn malformed_xml_aborts_the_generation() {
        let root = tempdir().expect("tempdir");
        let generation = staged_with_ids(root.path(), &[0]);
        write_report(&generation, "<report><detail><ind_0>");
        let err = parse_report(&generation).expect_err("malformed report");
        assert!(matches!(err, ReportError::Malformed(_)));
    }

    #[test]
    fn record_without_fitness_aborts_the_generation() {
        let root = tempdir().expect("tempdir");
        let generation = staged_with_ids(root.path(), &[1, 2]);
        write_report(
            &generation,
            "<report><detail>\
             <ind_1><fitness_score>0.5</fitness_score></ind_1>\
             <ind_2><distance>3.0</distance></ind_2>\
             </detail></report>",
        );
        let err = parse_report(&generation).expect_err("missing fitness");
        assert!(matches!(err, ReportError::MissingFitness(tag) if tag == "ind_2"));
    }

    #[test]
    fn unmatched_id_is_a_parse_error() {
        let root = tempdir().expect("tempdir");
        let generation = staged_with_ids(root.path(), &[1]);
        write_report(
            &generation,
            "<report><detail>\
             <ind_9><fitness_score>2.0</fitness_score></ind_9>\
             </detail></report>",
        );
        let err = parse_report(&generation).expect_err("unknown organism");
        assert!(matches!(err, ReportError::UnknownOrganism { id, .. } if id == "9"));
    }

    #[test]
    fn labels_with_underscores_keep_the_trailing_id() {
        let root = tempdir().expect("tempdir");
        let settings = SimulationSettings::with_default_materials(0.5, 2.0).expect("settings");
        let mut generation =
            GenerationDir::stage(root.path(), "gen_0001", &settings).expect("stage");
        let mut morphology = Morphology::zeros((1, 1, 1));
        morphology[[0, 0, 0]] = 1;
        encode_morphology(
            settings.palette(),
            &mut generation,
            &morphology,
            "soft_bot",
            12,
            0,
        )
        .expect("encode");
        write_report(
            &generation,
            "<report><detail>\
             <soft_bot_12><fitness_score>0.75</fitness_score></soft_bot_12>\
             </detail></report>",
        );
        let report = parse_report(&generation).expect("parse");
        assert_eq!(report["12"], 0.75);
    }
}

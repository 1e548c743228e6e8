//! On-disk model bundle
//!
//! ```text
//! <dir>/
//!   metadata.json        descriptor, written last
//!   sequence_model.bin   bincode SequenceModelArtifact
//!   scaler.bin           bincode FittedScaler
//!   blend_model.bin      bincode BlendModelArtifact
//! ```
//!
//! A directory holding a descriptor is a finished bundle and is never
//! overwritten. Retraining writes a new bundle instead.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::{FeatureConfig, PhysicsConfig, SequenceConfig};
use crate::domain::SiteGeometry;
use crate::error::{ForecastError, Result};
use crate::forecast::{FeatureBuilder, ForecastMetrics};
use crate::ml::{BlendModelArtifact, FittedScaler, SequenceModelArtifact, SequencePredictor};

/// Bumped whenever the layout of any bundle file changes
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

pub const METADATA_FILE: &str = "metadata.json";
pub const SEQUENCE_FILE: &str = "sequence_model.bin";
pub const SCALER_FILE: &str = "scaler.bin";
pub const BLEND_FILE: &str = "blend_model.bin";

/// Out-of-sample accuracy on the validation split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub physics: ForecastMetrics,
    pub sequence: ForecastMetrics,
    pub blend: ForecastMetrics,
    /// Repeat-last-value reference
    pub persistence: ForecastMetrics,
    pub training_samples: usize,
    pub validation_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub format_version: u32,
    pub crate_version: String,
    pub bundle_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub training_start: DateTime<Utc>,
    pub training_end: DateTime<Utc>,
    pub cadence_minutes: u32,
    pub features: FeatureConfig,
    pub feature_names: Vec<String>,
    pub sequence: SequenceConfig,
    pub physics: PhysicsConfig,
    pub site: SiteGeometry,
    pub metrics: TrainingMetrics,
}

impl BundleMetadata {
    pub fn cadence(&self) -> Duration {
        Duration::minutes(self.cadence_minutes as i64)
    }

    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(self.features, self.cadence())
    }
}

/// Everything needed to forecast, as produced by training
#[derive(Debug)]
pub struct ModelBundle {
    pub metadata: BundleMetadata,
    pub sequence: SequencePredictor,
    pub blend: BlendModelArtifact,
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| ForecastError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value)?;
    writer.flush().map_err(|e| ForecastError::io(path, e))
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| ForecastError::io(path, e))?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}

impl ModelBundle {
    pub fn id(&self) -> Uuid {
        self.metadata.bundle_id
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let metadata_path = dir.join(METADATA_FILE);
        if metadata_path.exists() {
            return Err(ForecastError::io(
                &metadata_path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "directory already holds a model bundle",
                ),
            ));
        }
        fs::create_dir_all(dir).map_err(|e| ForecastError::io(dir, e))?;

        write_bincode(&dir.join(SEQUENCE_FILE), self.sequence.artifact())?;
        write_bincode(&dir.join(SCALER_FILE), self.sequence.scaler())?;
        write_bincode(&dir.join(BLEND_FILE), &self.blend)?;

        let file = File::create(&metadata_path).map_err(|e| ForecastError::io(&metadata_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.metadata)?;
        writer
            .flush()
            .map_err(|e| ForecastError::io(&metadata_path, e))?;

        info!(bundle_id = %self.id(), dir = %dir.display(), "model bundle saved");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let metadata_path = dir.join(METADATA_FILE);
        let file = File::open(&metadata_path).map_err(|e| ForecastError::io(&metadata_path, e))?;
        let metadata: BundleMetadata = serde_json::from_reader(BufReader::new(file))?;

        if metadata.format_version != BUNDLE_FORMAT_VERSION {
            return Err(ForecastError::VersionMismatch(format!(
                "bundle format version {} is not supported (expected {})",
                metadata.format_version, BUNDLE_FORMAT_VERSION
            )));
        }

        let builder = metadata.feature_builder();
        let scaler: FittedScaler = read_bincode(&dir.join(SCALER_FILE))?;
        if scaler.width() != builder.width() {
            return Err(ForecastError::VersionMismatch(format!(
                "scaler has {} columns but feature config {:?} yields {}",
                scaler.width(),
                metadata.features,
                builder.width()
            )));
        }
        let artifact: SequenceModelArtifact = read_bincode(&dir.join(SEQUENCE_FILE))?;
        let blend: BlendModelArtifact = read_bincode(&dir.join(BLEND_FILE))?;
        let sequence = SequencePredictor::new(artifact, scaler, builder)?;

        info!(
            bundle_id = %metadata.bundle_id,
            crate_version = %metadata.crate_version,
            trained_at = %metadata.trained_at,
            "model bundle loaded"
        );
        Ok(Self {
            metadata,
            sequence,
            blend,
        })
    }
}

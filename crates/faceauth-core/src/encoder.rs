//! Image → feature vector encoding.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FeatureVector;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("{count} faces detected; exactly one is required")]
    MultipleFacesDetected { count: usize },
    #[error("image could not be decoded: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns an encoded image containing exactly one face into a [`FeatureVector`].
pub trait FaceEncoder: Send {
    fn encode(&mut self, image: &[u8]) -> Result<FeatureVector, EncodeError>;

    /// Read `path` and encode its contents.
    fn encode_file(&mut self, path: &Path) -> Result<FeatureVector, EncodeError> {
        let bytes = std::fs::read(path)?;
        self.encode(&bytes)
    }
}

/// SCRFD detection followed by ArcFace recognition.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`. Fails if either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncodeError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, image: &[u8]) -> Result<FeatureVector, EncodeError> {
        let rgb = image::load_from_memory(image)?.to_rgb8();
        let faces = self.detector.detect(&rgb)?;
        tracing::debug!(
            width = rgb.width(),
            height = rgb.height(),
            faces = faces.len(),
            "detection complete"
        );

        let face = match faces.as_slice() {
            [] => return Err(EncodeError::NoFaceDetected),
            [face] => face,
            many => {
                return Err(EncodeError::MultipleFacesDetected { count: many.len() });
            }
        };

        Ok(self.recognizer.extract(&rgb, face)?)
    }
}

/// Default model directory: `$XDG_DATA_HOME/faceauth/models`.
pub fn default_model_dir() -> PathBuf {
    data_home().join("faceauth").join("models")
}

/// `$XDG_DATA_HOME`, falling back to `$HOME/.local/share`, then `/tmp`.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<f32>);

    impl FaceEncoder for Fixed {
        fn encode(&mut self, image: &[u8]) -> Result<FeatureVector, EncodeError> {
            if image.is_empty() {
                return Err(EncodeError::NoFaceDetected);
            }
            Ok(FeatureVector::new(self.0.clone()))
        }
    }

    #[test]
    fn test_encode_file_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.bin");
        std::fs::write(&path, b"pixels").unwrap();

        let mut enc = Fixed(vec![1.0, 2.0]);
        let v = enc.encode_file(&path).unwrap();
        assert_eq!(v.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_encode_file_missing_is_io_error() {
        let mut enc = Fixed(vec![1.0]);
        let err = enc
            .encode_file(Path::new("/nonexistent/faceauth/face.png"))
            .unwrap_err();
        assert!(matches!(err, EncodeError::Io(_)));
    }

    #[test]
    fn test_load_missing_models_fails_fast() {
        let err = OnnxFaceEncoder::load(Path::new("/nonexistent/faceauth-models")).err();
        assert!(matches!(
            err,
            Some(EncodeError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }

    #[test]
    fn test_default_model_dir_is_under_faceauth() {
        assert!(default_model_dir().ends_with("faceauth/models"));
    }
}

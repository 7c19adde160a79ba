//! Face feature vectors, match policies, and encoding for faceauth.
//!
//! The bundled encoder runs SCRFD for detection and ArcFace for recognition
//! via ONNX Runtime on the CPU. Matching is a pure function over vectors.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use encoder::{default_model_dir, EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use matcher::{ClosestMatch, FirstMatch, MatchPolicy, Matcher};
pub use types::{BoundingBox, FeatureVector, Registration};

//! Error types for lookout-eye

use lookout_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Store(inner) => inner,
            other => CoreError::Storage(format!("Vision error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Camera("Test error".to_string());
        assert!(err.to_string().contains("Camera error"));
        assert!(err.to_string().contains("Test error"));

        let err = VisionError::Timeout(250);
        assert_eq!(err.to_string(), "Timed out after 250 ms");
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let vision_err = VisionError::Model("detector offline".to_string());
        let core_err: CoreError = vision_err.into();
        match core_err {
            CoreError::Storage(msg) => {
                assert!(msg.contains("Vision error"));
                assert!(msg.contains("detector offline"));
            }
            _ => panic!("Expected Storage error"),
        }
    }

    #[test]
    fn test_store_error_unwraps_to_core() {
        let vision_err = VisionError::from(CoreError::InvalidKey("bad/key".to_string()));
        let core_err: CoreError = vision_err.into();
        assert!(matches!(core_err, CoreError::InvalidKey(_)));
    }
}

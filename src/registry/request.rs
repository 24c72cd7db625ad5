//! Validated start request

use super::error::RegistryError;

/// Longest accepted stream id, in bytes
pub const MAX_ID_LEN: usize = 256;

/// Request to start transcoding one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraStreamRequest {
    /// Stream identifier
    pub id: String,
    /// Source address, credentials included
    pub source_url: String,
}

impl CameraStreamRequest {
    /// Validate and build a request
    ///
    /// Both fields must be non-blank. The source may not start with `-`, since
    /// the transcoder would read it as an option.
    pub fn new(id: impl Into<String>, source_url: impl Into<String>) -> Result<Self, RegistryError> {
        let id = id.into().trim().to_string();
        let source_url = source_url.into().trim().to_string();
        let known_id = (!id.is_empty()).then(|| id.clone());

        let invalid = |message: &str| RegistryError::Validation {
            id: known_id.clone(),
            message: message.to_string(),
        };

        if id.is_empty() || source_url.is_empty() {
            return Err(invalid("missing stream id or source URL"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(invalid("stream id too long"));
        }
        if source_url.starts_with('-') {
            return Err(invalid("source URL may not start with '-'"));
        }

        Ok(Self { id, source_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let req = CameraStreamRequest::new(" cam1 ", "rtsp://host/cam1").unwrap();

        assert_eq!(req.id, "cam1");
        assert_eq!(req.source_url, "rtsp://host/cam1");
    }

    #[test]
    fn test_missing_fields() {
        let err = CameraStreamRequest::new("", "rtsp://host/cam1").unwrap_err();
        assert_eq!(err.id(), None);

        let err = CameraStreamRequest::new("cam1", "   ").unwrap_err();
        assert_eq!(err.id(), Some("cam1"));
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn test_option_like_source_rejected() {
        let err = CameraStreamRequest::new("cam1", "-filter_complex x").unwrap_err();

        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn test_long_id_rejected() {
        let id = "x".repeat(MAX_ID_LEN + 1);

        assert!(CameraStreamRequest::new(id, "rtsp://host").is_err());
    }
}

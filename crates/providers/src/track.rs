use std::path::PathBuf;

/// One download request as the caller specified it. The engine never
/// computes filenames; the caller resolves naming before handing this in.
#[derive(Debug, Clone)]
pub struct TrackRequest {
    /// Reference catalog track id shared across backends.
    pub track_id: String,
    /// ISRC, required by backends that look tracks up by recording code.
    pub isrc: Option<String>,
    /// Backend-specific quality code; each provider has its own default.
    pub quality: Option<String>,
    pub output_dir: PathBuf,
    pub file_name: String,
}

impl TrackRequest {
    pub fn target_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }

    /// Requested quality, or the provider's default.
    pub fn quality_or(&self, default: &str) -> String {
        match &self.quality {
            Some(quality) if !quality.is_empty() => quality.clone(),
            _ => default.to_string(),
        }
    }

    /// A non-empty file already at the target path short-circuits the
    /// whole download. Zero-byte leftovers from failed runs don't count.
    pub fn existing_output(&self) -> Option<PathBuf> {
        let target = self.target_path();
        match std::fs::metadata(&target) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &std::path::Path) -> TrackRequest {
        TrackRequest {
            track_id: "4uLU6hMCjMI75M1A2tKUQC".to_string(),
            isrc: None,
            quality: None,
            output_dir: dir.to_path_buf(),
            file_name: "song.flac".to_string(),
        }
    }

    #[test]
    fn target_path_joins_dir_and_name() {
        let req = request(std::path::Path::new("/music"));
        assert_eq!(req.target_path(), PathBuf::from("/music/song.flac"));
    }

    #[test]
    fn quality_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(dir.path());
        assert_eq!(req.quality_or("6"), "6");
        req.quality = Some(String::new());
        assert_eq!(req.quality_or("6"), "6");
        req.quality = Some("27".to_string());
        assert_eq!(req.quality_or("6"), "27");
    }

    #[test]
    fn missing_output_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(request(dir.path()).existing_output(), None);
    }

    #[test]
    fn empty_output_is_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        std::fs::write(req.target_path(), b"").unwrap();
        assert_eq!(req.existing_output(), None);
    }

    #[test]
    fn non_empty_output_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path());
        std::fs::write(req.target_path(), b"flac bytes").unwrap();
        assert_eq!(req.existing_output(), Some(req.target_path()));
    }
}

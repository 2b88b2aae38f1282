//! Transcriber collaborator contract.
//!
//! Speech-to-text itself happens outside the core. The contract is narrow:
//! given audio file paths and a mapping id, produce and persist a transcript
//! artifact and hand back its path. Implementations must be idempotent per
//! mapping id.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::transcript::types::TranscribeError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Produce the transcript artifact for `mapping_id` from `audio_files`.
    async fn transcribe(
        &self,
        mapping_id: &str,
        audio_files: &[PathBuf],
    ) -> Result<PathBuf, TranscribeError>;
}

/// Shells out to an external transcription command.
///
/// Invoked as `<command> <mapping_id> <artifact_path> <audio_file>...`; the
/// command is expected to write the artifact JSON at the given path.
pub struct CommandTranscriber {
    command: String,
    artifact_dir: PathBuf,
}

impl CommandTranscriber {
    pub fn new(command: String, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            command,
            artifact_dir: artifact_dir.into(),
        }
    }

    fn artifact_path(&self, mapping_id: &str) -> PathBuf {
        self.artifact_dir.join(format!("{mapping_id}.json"))
    }
}

#[async_trait]
impl Transcriber for CommandTranscriber {
    async fn transcribe(
        &self,
        mapping_id: &str,
        audio_files: &[PathBuf],
    ) -> Result<PathBuf, TranscribeError> {
        let artifact = self.artifact_path(mapping_id);
        if artifact.exists() {
            debug!(mapping_id, "transcript artifact already present, reusing");
            return Ok(artifact);
        }
        std::fs::create_dir_all(&self.artifact_dir)?;

        info!(mapping_id, files = audio_files.len(), "starting transcription");
        let status = tokio::process::Command::new(&self.command)
            .arg(mapping_id)
            .arg(&artifact)
            .args(audio_files)
            .status()
            .await?;
        if !status.success() {
            return Err(TranscribeError::Backend(format!(
                "transcriber command exited with {status}"
            )));
        }
        if !artifact.exists() {
            return Err(TranscribeError::Backend(format!(
                "transcriber command produced no artifact at {}",
                artifact.display()
            )));
        }
        Ok(artifact)
    }
}

impl std::fmt::Debug for CommandTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTranscriber")
            .field("command", &self.command)
            .field("artifact_dir", &self.artifact_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn existing_artifact_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber =
            CommandTranscriber::new("/nonexistent/command".into(), dir.path());
        let artifact = dir.path().join("book-1.json");
        std::fs::write(&artifact, "{\"segments\":[]}").unwrap();

        // the command would fail if it ran; the cached artifact wins
        let out = transcriber.transcribe("book-1", &[]).await.unwrap();
        assert_eq!(out, artifact);
    }

    #[tokio::test]
    async fn missing_command_surfaces_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let transcriber =
            CommandTranscriber::new("/nonexistent/command".into(), dir.path());
        let err = transcriber.transcribe("book-2", &[]).await.unwrap_err();
        assert!(matches!(err, TranscribeError::Io(_)));
    }
}

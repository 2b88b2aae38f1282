//! Mapping lifecycle state machine
//!
//! Walks the job queue once per tick: `pending` mappings get transcribed
//! and their ebook index primed, `pending_transcript` mappings wait for an
//! externally produced artifact, `failed_retry` mappings are requeued. A
//! mapping becomes `active` only once the transcript artifact exists and
//! the ebook index has been built.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::adapters::AudiobookApi;
use crate::ebook::EbookIndex;
use crate::store::{Mapping, MappingStatus, ProgressStore};
use crate::transcript::Transcriber;

pub struct JobController<A> {
    store: Arc<ProgressStore>,
    audiobook: A,
    transcriber: Option<Arc<dyn Transcriber>>,
    books_dir: PathBuf,
    cache_dir: PathBuf,
}

impl<A: AudiobookApi> JobController<A> {
    pub fn new(
        store: Arc<ProgressStore>,
        audiobook: A,
        transcriber: Option<Arc<dyn Transcriber>>,
        books_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            audiobook,
            transcriber,
            books_dir: books_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Advance every queued mapping one step. Failures are local to their
    /// mapping.
    pub async fn check_pending(&self) {
        for mapping in self.store.list_mappings() {
            let result = match mapping.status {
                MappingStatus::Pending | MappingStatus::FailedRetry => {
                    self.process_pending(&mapping).await
                }
                MappingStatus::PendingTranscript => self.process_pending_transcript(&mapping),
                _ => Ok(()),
            };
            if let Err(err) = result {
                error!(title = %mapping.title, %err, "job queue update failed");
            }
        }
    }

    /// Full pipeline: fetch audio paths, transcribe, prime the ebook index.
    async fn process_pending(&self, mapping: &Mapping) -> Result<(), crate::store::StoreError> {
        let id = mapping.audiobook_id.as_str();
        let Some(transcriber) = &self.transcriber else {
            // a requeued mapping whose artifact already exists can still
            // activate without a transcriber
            if mapping.transcript_ref.as_deref().is_some_and(|p| p.exists()) {
                return self.process_pending_transcript(mapping);
            }
            debug!(title = %mapping.title, "no transcriber configured, job stays queued");
            return Ok(());
        };
        info!(title = %mapping.title, "starting transcription job");
        self.store.update_status(id, MappingStatus::Processing)?;

        let audio_files = match self.audiobook.audio_files(id).await {
            Ok(files) if files.is_empty() => {
                error!(title = %mapping.title, "no audio files found");
                self.store.update_status(id, MappingStatus::Failed)?;
                return Ok(());
            }
            Ok(files) => files,
            Err(err) => {
                warn!(title = %mapping.title, %err, "audio file listing failed, retrying next tick");
                self.store.update_status(id, MappingStatus::FailedRetry)?;
                return Ok(());
            }
        };

        let transcript_ref = match transcriber.transcribe(id, &audio_files).await {
            Ok(path) => path,
            Err(err) => {
                error!(title = %mapping.title, %err, "transcription failed, retrying next tick");
                self.store.update_status(id, MappingStatus::FailedRetry)?;
                return Ok(());
            }
        };

        if let Err(err) = self.prime_ebook_index(mapping) {
            error!(title = %mapping.title, %err, "ebook index priming failed, retrying next tick");
            self.store.update_status(id, MappingStatus::FailedRetry)?;
            return Ok(());
        }

        self.store.set_transcript_ref(id, transcript_ref)?;
        self.store.update_status(id, MappingStatus::Active)?;
        info!(title = %mapping.title, "job complete, mapping active");
        Ok(())
    }

    /// Side-pipeline workflow: the artifact is produced elsewhere; activate
    /// once it appears on disk and the ebook index builds.
    fn process_pending_transcript(
        &self,
        mapping: &Mapping,
    ) -> Result<(), crate::store::StoreError> {
        let id = mapping.audiobook_id.as_str();
        let Some(transcript_ref) = &mapping.transcript_ref else {
            return Ok(());
        };
        if !transcript_ref.exists() {
            return Ok(());
        }
        info!(title = %mapping.title, "transcript artifact appeared, activating");
        if let Err(err) = self.prime_ebook_index(mapping) {
            error!(title = %mapping.title, %err, "ebook index priming failed, retrying next tick");
            self.store.update_status(id, MappingStatus::FailedRetry)?;
            return Ok(());
        }
        self.store.update_status(id, MappingStatus::Active)?;
        info!(title = %mapping.title, "mapping active");
        Ok(())
    }

    fn prime_ebook_index(&self, mapping: &Mapping) -> Result<(), crate::ebook::EbookError> {
        EbookIndex::load_or_build(&self.books_dir, &self.cache_dir, &mapping.ebook_file)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AudiobookApi, SourceError};
    use crate::transcript::transcriber::MockTranscriber;
    use crate::transcript::TranscribeError;
    use async_trait::async_trait;
    use std::io::Write;

    struct StubAudiobook {
        files: Vec<PathBuf>,
    }

    #[async_trait]
    impl AudiobookApi for StubAudiobook {
        async fn check_connection(&self) -> bool {
            true
        }
        async fn get_progress(&self, _item_id: &str) -> Result<f64, SourceError> {
            Ok(0.0)
        }
        async fn update_progress(&self, _item_id: &str, _seconds: f64) -> Result<(), SourceError> {
            Ok(())
        }
        async fn audio_files(&self, _item_id: &str) -> Result<Vec<PathBuf>, SourceError> {
            Ok(self.files.clone())
        }
    }

    fn write_minimal_epub(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("META-INF/container.xml", options).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();
        zip.start_file("OPS/content.opf", options).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest><item id="c1" href="ch1.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#,
        )
        .unwrap();
        zip.start_file("OPS/ch1.xhtml", options).unwrap();
        zip.write_all(
            br#"<html xmlns="http://www.w3.org/1999/xhtml"><body>
<p>A perfectly ordinary chapter with enough text to index.</p>
</body></html>"#,
        )
        .unwrap();
        zip.finish().unwrap();
        path
    }

    fn mapping(status: MappingStatus, transcript_ref: Option<PathBuf>) -> Mapping {
        Mapping {
            audiobook_id: "item-1".into(),
            ebook_doc_id: "hash-1".into(),
            ebook_file: "book.epub".into(),
            title: "Book".into(),
            transcript_ref,
            status,
        }
    }

    #[tokio::test]
    async fn pending_job_transcribes_and_activates() {
        let data = tempfile::tempdir().unwrap();
        let books = tempfile::tempdir().unwrap();
        write_minimal_epub(books.path(), "book.epub");
        let store = Arc::new(ProgressStore::open(data.path()).unwrap());
        store
            .add_mapping(mapping(MappingStatus::Pending, None))
            .unwrap();

        let artifact = data.path().join("item-1.json");
        let artifact_for_mock = artifact.clone();
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().times(1).returning(move |_, _| {
            std::fs::write(
                &artifact_for_mock,
                r#"{"segments":[{"start_time":0.0,"end_time":5.0,"text":"hello"}]}"#,
            )
            .unwrap();
            Ok(artifact_for_mock.clone())
        });

        let controller = JobController::new(
            store.clone(),
            StubAudiobook {
                files: vec![PathBuf::from("/library/book/track1.mp3")],
            },
            Some(Arc::new(transcriber)),
            books.path(),
            data.path().join("ebook_index"),
        );
        controller.check_pending().await;

        let updated = store.get_mapping("item-1").unwrap();
        assert_eq!(updated.status, MappingStatus::Active);
        assert_eq!(updated.transcript_ref.as_deref(), Some(artifact.as_path()));
    }

    #[tokio::test]
    async fn transcription_failure_requeues_for_retry() {
        let data = tempfile::tempdir().unwrap();
        let books = tempfile::tempdir().unwrap();
        write_minimal_epub(books.path(), "book.epub");
        let store = Arc::new(ProgressStore::open(data.path()).unwrap());
        store
            .add_mapping(mapping(MappingStatus::Pending, None))
            .unwrap();

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_, _| {
            Err(TranscribeError::Backend("model exploded".into()))
        });

        let controller = JobController::new(
            store.clone(),
            StubAudiobook {
                files: vec![PathBuf::from("/library/book/track1.mp3")],
            },
            Some(Arc::new(transcriber)),
            books.path(),
            data.path().join("ebook_index"),
        );
        controller.check_pending().await;

        assert_eq!(
            store.get_mapping("item-1").unwrap().status,
            MappingStatus::FailedRetry
        );
    }

    #[tokio::test]
    async fn missing_audio_is_terminal() {
        let data = tempfile::tempdir().unwrap();
        let books = tempfile::tempdir().unwrap();
        let store = Arc::new(ProgressStore::open(data.path()).unwrap());
        store
            .add_mapping(mapping(MappingStatus::Pending, None))
            .unwrap();

        let controller = JobController::new(
            store.clone(),
            StubAudiobook { files: vec![] },
            Some(Arc::new(MockTranscriber::new())),
            books.path(),
            data.path().join("ebook_index"),
        );
        controller.check_pending().await;

        assert_eq!(
            store.get_mapping("item-1").unwrap().status,
            MappingStatus::Failed
        );
    }

    #[tokio::test]
    async fn pending_transcript_waits_for_artifact() {
        let data = tempfile::tempdir().unwrap();
        let books = tempfile::tempdir().unwrap();
        write_minimal_epub(books.path(), "book.epub");
        let store = Arc::new(ProgressStore::open(data.path()).unwrap());
        let artifact = data.path().join("external.json");
        store
            .add_mapping(mapping(
                MappingStatus::PendingTranscript,
                Some(artifact.clone()),
            ))
            .unwrap();

        let controller = JobController::new(
            store.clone(),
            StubAudiobook { files: vec![] },
            None,
            books.path(),
            data.path().join("ebook_index"),
        );

        controller.check_pending().await;
        assert_eq!(
            store.get_mapping("item-1").unwrap().status,
            MappingStatus::PendingTranscript
        );

        std::fs::write(
            &artifact,
            r#"{"segments":[{"start_time":0.0,"end_time":5.0,"text":"hello"}]}"#,
        )
        .unwrap();
        controller.check_pending().await;
        assert_eq!(
            store.get_mapping("item-1").unwrap().status,
            MappingStatus::Active
        );
    }

    #[tokio::test]
    async fn pending_without_transcriber_stays_queued() {
        let data = tempfile::tempdir().unwrap();
        let books = tempfile::tempdir().unwrap();
        let store = Arc::new(ProgressStore::open(data.path()).unwrap());
        store
            .add_mapping(mapping(MappingStatus::Pending, None))
            .unwrap();

        let controller = JobController::new(
            store.clone(),
            StubAudiobook { files: vec![] },
            None,
            books.path(),
            data.path().join("ebook_index"),
        );
        controller.check_pending().await;
        assert_eq!(
            store.get_mapping("item-1").unwrap().status,
            MappingStatus::Pending
        );
    }
}

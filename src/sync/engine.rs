//! The per-cycle reconciliation pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::adapters::{AudiobookApi, EbookSyncApi, ReadalongDb, ReadalongPosition};
use crate::ebook::EbookIndex;
use crate::matching::FuzzyMatcher;
use crate::store::{Mapping, MappingStatus, ProgressStore, ReconState};
use crate::sync::types::{
    ChangeSet, CycleOutcome, Observation, Source, SyncError, Thresholds,
};
use crate::transcript::TranscriptIndex;

/// Owns the adapter bundle, the indices and the thresholds for the whole
/// steady-state sync. One engine instance reconciles all mappings
/// sequentially; per-mapping state is never shared across tasks.
pub struct ReconciliationEngine<A, E, R> {
    audiobook: A,
    ebook_sync: E,
    readalong: R,
    store: Arc<ProgressStore>,
    matcher: FuzzyMatcher,
    thresholds: Thresholds,
    books_dir: PathBuf,
    cache_dir: PathBuf,
    transcripts: HashMap<String, Arc<TranscriptIndex>>,
    ebooks: HashMap<String, Arc<EbookIndex>>,
}

impl<A, E, R> ReconciliationEngine<A, E, R>
where
    A: AudiobookApi,
    E: EbookSyncApi,
    R: ReadalongDb,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        audiobook: A,
        ebook_sync: E,
        readalong: R,
        store: Arc<ProgressStore>,
        thresholds: Thresholds,
        books_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            audiobook,
            ebook_sync,
            readalong,
            store,
            matcher: FuzzyMatcher::default(),
            thresholds,
            books_dir: books_dir.into(),
            cache_dir: cache_dir.into(),
            transcripts: HashMap::new(),
            ebooks: HashMap::new(),
        }
    }

    /// Pre-populate the index caches for a mapping, avoiding a disk load on
    /// the first cycle after a job completes.
    pub fn warm(&mut self, mapping: &Mapping, transcript: TranscriptIndex, ebook: EbookIndex) {
        self.transcripts
            .insert(mapping.audiobook_id.clone(), Arc::new(transcript));
        self.ebooks
            .insert(mapping.ebook_file.clone(), Arc::new(ebook));
    }

    /// Reconcile every active mapping once. Per-mapping failures never
    /// abort the cycle for the others.
    pub async fn run_cycle(&mut self) {
        let mappings = self.store.list_mappings();
        if mappings.is_empty() {
            return;
        }
        debug!(mappings = mappings.len(), "reconciliation cycle start");
        for mapping in &mappings {
            if mapping.status != MappingStatus::Active {
                continue;
            }
            match self.reconcile_mapping(mapping).await {
                Ok(CycleOutcome::Idle) => {}
                Ok(outcome) => debug!(title = %mapping.title, ?outcome, "cycle outcome"),
                Err(err) => error!(title = %mapping.title, %err, "reconciliation failed"),
            }
        }
    }

    /// One mapping, one cycle: collect, diff, absorb or translate,
    /// propagate, persist.
    pub async fn reconcile_mapping(
        &mut self,
        mapping: &Mapping,
    ) -> Result<CycleOutcome, SyncError> {
        let id = mapping.audiobook_id.as_str();

        let transcript = match self.transcript_index(mapping) {
            Ok(index) => index,
            Err(reason) => {
                warn!(title = %mapping.title, reason, "transcript unavailable, waiting for artifact");
                self.store
                    .update_status(id, MappingStatus::PendingTranscript)?;
                return Ok(CycleOutcome::Deferred {
                    status: MappingStatus::PendingTranscript,
                });
            }
        };
        let ebook = match self.ebook_index(mapping) {
            Ok(index) => index,
            Err(err) => {
                warn!(title = %mapping.title, %err, "ebook index unavailable, requeueing job");
                self.store.update_status(id, MappingStatus::Pending)?;
                return Ok(CycleOutcome::Deferred {
                    status: MappingStatus::Pending,
                });
            }
        };

        // collect; a transport failure leaves state untouched
        let audio_seconds = match self.audiobook.get_progress(id).await {
            Ok(v) => v,
            Err(err) => return Ok(skipped(Source::Audiobook, err)),
        };
        let ebook_fraction = match self.ebook_sync.get_progress(&mapping.ebook_doc_id).await {
            Ok(v) => v,
            Err(err) => return Ok(skipped(Source::EbookSync, err)),
        };
        let readalong_fraction = match self.readalong.get_progress(&mapping.ebook_file).await {
            Ok((fraction, _ts)) => fraction.unwrap_or(0.0),
            Err(err) => return Ok(skipped(Source::Readalong, err)),
        };
        let observed = Observation {
            audio_seconds,
            ebook_fraction,
            readalong_fraction,
        };

        let prior = self.store.state(id);
        let d_audio = (audio_seconds - prior.audio_seconds).abs();
        let d_ebook = (ebook_fraction - prior.ebook_fraction).abs();
        let d_readalong = (readalong_fraction - prior.readalong_fraction).abs();

        let mut changed = ChangeSet {
            audiobook: d_audio > self.thresholds.audio_seconds,
            ebook_sync: d_ebook > self.thresholds.ebook_fraction,
            readalong: d_readalong > self.thresholds.ebook_fraction,
        };

        // sub-threshold drift is accepted into state without propagating,
        // so a steady trickle can never accumulate into a spurious update
        let mut state = prior.clone();
        let mut absorbed = false;
        if d_audio > 0.0 && !changed.audiobook {
            debug!(delta = d_audio, "audiobook drift below threshold, absorbing");
            state.audio_seconds = audio_seconds;
            state.ebook_char_cursor = 0;
            absorbed = true;
        }
        if d_ebook > 0.0 && !changed.ebook_sync {
            let chars = ebook.char_delta(prior.ebook_fraction, ebook_fraction);
            if chars > self.thresholds.char_window {
                info!(
                    chars,
                    threshold = self.thresholds.char_window,
                    "sub-threshold ebook move escalated on char distance"
                );
                changed.ebook_sync = true;
            } else {
                debug!(delta = d_ebook, chars, "ebook drift below both thresholds, absorbing");
                state.ebook_fraction = ebook_fraction;
                state.ebook_char_cursor = 0;
                absorbed = true;
            }
        }
        if d_readalong > 0.0 && !changed.readalong {
            debug!(delta = d_readalong, "read-along drift below threshold, absorbing");
            state.readalong_fraction = readalong_fraction;
            absorbed = true;
        }
        if absorbed {
            state.last_updated = now_secs();
            self.store.put_state(id, state.clone())?;
        }
        let Some(source) = changed.winner() else {
            return Ok(if absorbed {
                CycleOutcome::Absorbed
            } else {
                CycleOutcome::Idle
            });
        };

        info!(
            title = %mapping.title,
            audio = format_args!("{:.2}s -> {:.2}s", prior.audio_seconds, audio_seconds),
            ebook = format_args!("{:.4} -> {:.4}", prior.ebook_fraction, ebook_fraction),
            readalong = format_args!("{:.4} -> {:.4}", prior.readalong_fraction, readalong_fraction),
            "change detected"
        );

        if let Some(source) = detect_regression(&state, &observed, &changed, self.thresholds.regression)
        {
            warn!(
                %source,
                "backwards move beyond tolerance; restarts must be done deliberately in all systems"
            );
            self.snap(id, &state, &observed)?;
            return Ok(CycleOutcome::RegressionBlocked { source });
        }

        if changed.count() > 1 {
            warn!(%source, n = changed.count(), "conflict: multiple sources moved, priority source wins");
        }

        match source {
            Source::Audiobook => {
                self.propagate_from_audiobook(mapping, &transcript, &ebook, &state, &observed)
                    .await
            }
            Source::EbookSync => {
                self.propagate_from_ebook_sync(mapping, &transcript, &state, &observed, &ebook)
                    .await
            }
            Source::Readalong => {
                self.propagate_from_readalong(mapping, &transcript, &ebook, &observed)
                    .await
            }
        }
    }

    /// Audiobook moved: transcript text at the new position is located in
    /// the ebook and pushed to both ebook-side authorities.
    async fn propagate_from_audiobook(
        &self,
        mapping: &Mapping,
        transcript: &TranscriptIndex,
        ebook: &EbookIndex,
        base: &ReconState,
        observed: &Observation,
    ) -> Result<CycleOutcome, SyncError> {
        let source = Source::Audiobook;
        let id = mapping.audiobook_id.as_str();

        let Some(query) = transcript.text_at_time(observed.audio_seconds) else {
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "no transcript text at position"));
        };
        debug!(query = %preview(query), "searching ebook for transcript text");
        let Some(location) = ebook.locate(&self.matcher, query) else {
            warn!("ebook text match failed");
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "ebook match failed"));
        };
        info!(
            fraction = format_args!("{:.4}", location.fraction),
            locator = %location.locator,
            "audiobook position aligned to ebook"
        );

        if let Err(err) = self
            .ebook_sync
            .update_progress(&mapping.ebook_doc_id, location.fraction, &location.locator)
            .await
        {
            warn!(%err, "ebook sync write failed");
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "ebook sync write failed"));
        }
        let readalong_ok = match self
            .readalong
            .update_progress(&mapping.ebook_file, location.fraction, now_secs())
            .await
        {
            Ok(ok) => ok,
            Err(err) => {
                warn!(%err, "read-along write failed");
                false
            }
        };

        self.store.put_state(
            id,
            ReconState {
                audio_seconds: observed.audio_seconds,
                ebook_fraction: location.fraction,
                readalong_fraction: if readalong_ok {
                    location.fraction
                } else {
                    base.readalong_fraction
                },
                last_updated: now_secs(),
                ebook_char_cursor: location.char_offset as u64,
            },
        )?;
        Ok(CycleOutcome::Propagated { source })
    }

    /// Ebook sync moved: the window of ebook text at the new fraction is
    /// found in the transcript and pushed to the audiobook server and the
    /// read-along database.
    async fn propagate_from_ebook_sync(
        &self,
        mapping: &Mapping,
        transcript: &TranscriptIndex,
        base: &ReconState,
        observed: &Observation,
        ebook: &EbookIndex,
    ) -> Result<CycleOutcome, SyncError> {
        let source = Source::EbookSync;
        let id = mapping.audiobook_id.as_str();

        let Some(query) = ebook.text_at_fraction(observed.ebook_fraction) else {
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "no ebook text at fraction"));
        };
        debug!(query = %preview(&query), "searching transcript for ebook text");
        let Some(seconds) = transcript.time_for_text(&self.matcher, &query) else {
            warn!("transcript text match failed");
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "transcript match failed"));
        };
        info!(seconds = format_args!("{seconds:.2}"), "ebook position aligned to audiobook");

        if let Err(err) = self.audiobook.update_progress(id, seconds).await {
            warn!(%err, "audiobook write failed");
            self.snap(id, base, observed)?;
            return Ok(snapped(source, "audiobook write failed"));
        }
        let readalong_ok = match self
            .readalong
            .update_progress(&mapping.ebook_file, observed.ebook_fraction, now_secs())
            .await
        {
            Ok(ok) => ok,
            Err(err) => {
                warn!(%err, "read-along write failed");
                false
            }
        };

        self.store.put_state(
            id,
            ReconState {
                audio_seconds: seconds,
                ebook_fraction: observed.ebook_fraction,
                readalong_fraction: if readalong_ok {
                    observed.ebook_fraction
                } else {
                    base.readalong_fraction
                },
                last_updated: now_secs(),
                ebook_char_cursor: base.ebook_char_cursor,
            },
        )?;
        Ok(CycleOutcome::Propagated { source })
    }

    /// Read-along moved: prefer the precise fragment anchor when the app
    /// recorded one, fall back to the fraction window, then push to the
    /// audiobook server and the sync service.
    async fn propagate_from_readalong(
        &self,
        mapping: &Mapping,
        transcript: &TranscriptIndex,
        ebook: &EbookIndex,
        observed: &Observation,
    ) -> Result<CycleOutcome, SyncError> {
        let source = Source::Readalong;
        let id = mapping.audiobook_id.as_str();
        // state was not absorbed for the winning source, so observed values
        // are the only base needed here
        let base = self.store.state(id);

        let anchor = match self
            .readalong
            .get_progress_with_anchor(&mapping.ebook_file)
            .await
        {
            Ok(anchor) => anchor,
            Err(err) => {
                debug!(%err, "anchor read failed, falling back to fraction window");
                ReadalongPosition::default()
            }
        };
        let mut query = None;
        if let (Some(href), Some(fragment)) = (anchor.href.as_deref(), anchor.fragment_id.as_deref())
        {
            query = ebook.fragment_text(href, fragment);
            if query.is_some() {
                info!(fragment, "using precise fragment text");
            } else {
                debug!(fragment, "fragment lookup empty, falling back to fraction window");
            }
        }
        let Some(query) = query.or_else(|| ebook.text_at_fraction(observed.readalong_fraction))
        else {
            self.snap(id, &base, observed)?;
            return Ok(snapped(source, "no ebook text at fraction"));
        };

        debug!(query = %preview(&query), "searching transcript for read-along text");
        let Some(seconds) = transcript.time_for_text(&self.matcher, &query) else {
            warn!("transcript text match failed");
            self.snap(id, &base, observed)?;
            return Ok(snapped(source, "transcript match failed"));
        };
        let Some(location) = ebook.locate(&self.matcher, &query) else {
            self.snap(id, &base, observed)?;
            return Ok(snapped(source, "ebook locator derivation failed"));
        };
        info!(
            seconds = format_args!("{seconds:.2}"),
            locator = %location.locator,
            "read-along position aligned"
        );

        if let Err(err) = self.audiobook.update_progress(id, seconds).await {
            warn!(%err, "audiobook write failed");
            self.snap(id, &base, observed)?;
            return Ok(snapped(source, "audiobook write failed"));
        }
        if let Err(err) = self
            .ebook_sync
            .update_progress(
                &mapping.ebook_doc_id,
                observed.readalong_fraction,
                &location.locator,
            )
            .await
        {
            warn!(%err, "ebook sync write failed");
            self.snap(id, &base, observed)?;
            return Ok(snapped(source, "ebook sync write failed"));
        }

        self.store.put_state(
            id,
            ReconState {
                audio_seconds: seconds,
                ebook_fraction: observed.readalong_fraction,
                readalong_fraction: observed.readalong_fraction,
                last_updated: now_secs(),
                ebook_char_cursor: location.char_offset as u64,
            },
        )?;
        Ok(CycleOutcome::Propagated { source })
    }

    /// Snap-to-present: store the observed triple so the next cycle sees
    /// zero deltas and the same failing translation is not retried until a
    /// source actually moves further.
    fn snap(
        &self,
        id: &str,
        base: &ReconState,
        observed: &Observation,
    ) -> Result<(), SyncError> {
        self.store.put_state(
            id,
            ReconState {
                audio_seconds: observed.audio_seconds,
                ebook_fraction: observed.ebook_fraction,
                readalong_fraction: observed.readalong_fraction,
                last_updated: now_secs(),
                ebook_char_cursor: base.ebook_char_cursor,
            },
        )?;
        Ok(())
    }

    fn transcript_index(
        &mut self,
        mapping: &Mapping,
    ) -> Result<Arc<TranscriptIndex>, &'static str> {
        if let Some(index) = self.transcripts.get(&mapping.audiobook_id) {
            return Ok(index.clone());
        }
        let path = mapping
            .transcript_ref
            .as_deref()
            .ok_or("no transcript artifact recorded")?;
        let index = Arc::new(
            TranscriptIndex::load(path).map_err(|_| "transcript artifact unreadable")?,
        );
        self.transcripts
            .insert(mapping.audiobook_id.clone(), index.clone());
        Ok(index)
    }

    fn ebook_index(&mut self, mapping: &Mapping) -> Result<Arc<EbookIndex>, SyncError> {
        if let Some(index) = self.ebooks.get(&mapping.ebook_file) {
            return Ok(index.clone());
        }
        let index = Arc::new(EbookIndex::load_or_build(
            &self.books_dir,
            &self.cache_dir,
            &mapping.ebook_file,
        )?);
        self.ebooks
            .insert(mapping.ebook_file.clone(), index.clone());
        Ok(index)
    }
}

/// Regression detection over the changed sources. The audiobook axis is
/// seconds, so its backwards move is compared relative to the prior
/// position; the fraction axes compare absolutely.
fn detect_regression(
    prior: &ReconState,
    observed: &Observation,
    changed: &ChangeSet,
    tolerance: f64,
) -> Option<Source> {
    if changed.audiobook
        && observed.audio_seconds < prior.audio_seconds
        && prior.audio_seconds > 0.0
    {
        let relative = (prior.audio_seconds - observed.audio_seconds) / prior.audio_seconds;
        if relative > tolerance {
            return Some(Source::Audiobook);
        }
    }
    if changed.ebook_sync && prior.ebook_fraction - observed.ebook_fraction > tolerance {
        return Some(Source::EbookSync);
    }
    if changed.readalong && prior.readalong_fraction - observed.readalong_fraction > tolerance {
        return Some(Source::Readalong);
    }
    None
}

fn skipped(source: Source, err: impl std::fmt::Display) -> CycleOutcome {
    warn!(%source, %err, "source read failed, skipping mapping this cycle");
    CycleOutcome::Skipped {
        reason: format!("{source} read failed: {err}"),
    }
}

fn snapped(source: Source, reason: &'static str) -> CycleOutcome {
    CycleOutcome::Snapped { source, reason }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

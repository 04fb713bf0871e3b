//! Per-event orchestration: dedup, parse, fetch, assemble, dispatch, cleanup.
//!
//! This is the only place user-facing status text is composed. Every other
//! component reports typed outcomes.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    assemble::{display_label, Assembler, AssemblyError},
    command::{parse_command, usage_hint, Command},
    dispatch::{DispatchOutcome, Dispatcher},
    domain::{EventId, InboundEvent, PayloadKind, UserId},
    fetch::{AssemblyKind, ContentFetcher, FetchErrorKind, StrategyRegistry},
    scratch::{self, ScratchSpace},
    store::{quota::format_wait, Claim, IdempotencyStore},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    Received,
    Deduplicated,
    Parsed,
    Fetching,
    Assembling,
    Dispatching { index: usize, total: usize },
    Cleanup,
    Done,
    Aborted(AbortReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    Duplicate,
    /// The idempotency check itself failed; skipped rather than risk a
    /// duplicate run.
    DedupUnavailable,
    NotText,
    UnrecognizedCommand,
    QuotaExhausted,
    QuotaUnavailable,
    Scratch,
    Fetch(FetchErrorKind),
    Assembly,
    Dispatch,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Dispatching { index, total } => write!(f, "Dispatching({index}/{total})"),
            RunState::Aborted(reason) => write!(f, "Aborted({reason:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// How one run ended.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub event_id: EventId,
    pub state: RunState,
    pub sent: usize,
    pub total: usize,
}

/// Receives accepted webhook events. Must return immediately.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: InboundEvent);
}

pub struct Pipeline {
    idempotency: IdempotencyStore,
    dispatcher: Dispatcher,
    fetcher: ContentFetcher,
    registry: StrategyRegistry,
    assembler: Assembler,
    scratch_root: PathBuf,
}

struct Run {
    event_id: EventId,
    state: RunState,
}

impl Run {
    fn enter(&mut self, next: RunState) {
        debug!(event_id = %self.event_id, from = %self.state, to = %next, "run state");
        self.state = next;
    }

    fn finish(mut self, sent: usize, total: usize) -> RunReport {
        self.enter(RunState::Done);
        RunReport {
            event_id: self.event_id,
            state: self.state,
            sent,
            total,
        }
    }

    fn abort(mut self, reason: AbortReason, sent: usize, total: usize) -> RunReport {
        if reason == AbortReason::Duplicate {
            info!(event_id = %self.event_id, "event already processed, skipping");
        } else {
            warn!(event_id = %self.event_id, at = %self.state, reason = ?reason, sent, total, "run aborted");
        }
        self.state = RunState::Aborted(reason);
        RunReport {
            event_id: self.event_id,
            state: self.state,
            sent,
            total,
        }
    }
}

struct Delivered {
    sent: usize,
    skipped: usize,
    dropped: usize,
}

struct Failure {
    reason: AbortReason,
    message: String,
    sent: usize,
    total: usize,
}

impl Failure {
    fn before_dispatch(reason: AbortReason, message: String) -> Self {
        Self {
            reason,
            message,
            sent: 0,
            total: 0,
        }
    }
}

const GENERIC_FAILURE: &str = "Something went wrong while handling your request. Please try again later.";

impl Pipeline {
    pub fn new(
        idempotency: IdempotencyStore,
        dispatcher: Dispatcher,
        fetcher: ContentFetcher,
        registry: StrategyRegistry,
        assembler: Assembler,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            idempotency,
            dispatcher,
            fetcher,
            registry,
            assembler,
            scratch_root,
        }
    }

    /// Run one event to completion. Never fails: every problem ends the run
    /// in `Aborted` and, where the user should know, a status text.
    pub async fn handle(&self, event: InboundEvent) -> RunReport {
        let mut run = Run {
            event_id: event.event_id.clone(),
            state: RunState::Received,
        };

        match self.idempotency.claim(&event.event_id).await {
            Ok(Claim::Fresh) => run.enter(RunState::Deduplicated),
            Ok(Claim::Duplicate) => return run.abort(AbortReason::Duplicate, 0, 0),
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "idempotency check failed");
                return run.abort(AbortReason::DedupUnavailable, 0, 0);
            }
        }

        if let PayloadKind::Other(kind) = &event.payload_kind {
            debug!(event_id = %event.event_id, kind = %kind, "ignoring non-text message");
            return run.abort(AbortReason::NotText, 0, 0);
        }

        let user = &event.sender_id;
        let command = match parse_command(&event.body, &self.registry) {
            Ok(c) => c,
            Err(_) => {
                self.notify(user, &usage_hint(&self.registry)).await;
                return run.abort(AbortReason::UnrecognizedCommand, 0, 0);
            }
        };
        run.enter(RunState::Parsed);
        info!(
            event_id = %event.event_id,
            user = %user,
            strategy = %command.strategy.name,
            url = %command.job.source_url,
            "command accepted"
        );

        let quota = self.dispatcher.quota();
        match quota.remaining(user).await {
            Ok(0) => {
                let wait = quota.resets_in(user).await.ok().flatten();
                self.notify(user, &limit_text(quota.ceiling(), wait)).await;
                return run.abort(AbortReason::QuotaExhausted, 0, 0);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(user = %user, error = %e, "quota lookup failed");
                self.notify(user, GENERIC_FAILURE).await;
                return run.abort(AbortReason::QuotaUnavailable, 0, 0);
            }
        }

        let what = describe(&command);
        self.notify(user, &format!("Starting to process {what}")).await;

        let mut scratch = None;
        let outcome = self.deliver(&mut run, user, &command, &mut scratch).await;

        run.enter(RunState::Cleanup);
        if let Some(space) = scratch {
            space.close();
        }

        match outcome {
            Ok(done) => {
                let mut text = format!("Successfully sent {what} ({} file(s)).", done.sent);
                if done.skipped + done.dropped > 0 {
                    text.push_str(&format!(
                        "\n{} item(s) could not be included.",
                        done.skipped + done.dropped
                    ));
                }
                if let Ok(remaining) = quota.remaining(user).await {
                    text.push_str(&format!(
                        "\nYou have {remaining} media messages remaining today."
                    ));
                }
                self.notify(user, &text).await;
                run.finish(done.sent, done.sent)
            }
            Err(f) => {
                self.notify(user, &f.message).await;
                run.abort(f.reason, f.sent, f.total)
            }
        }
    }

    async fn deliver(
        &self,
        run: &mut Run,
        user: &UserId,
        command: &Command,
        scratch: &mut Option<ScratchSpace>,
    ) -> Result<Delivered, Failure> {
        let url = &command.job.source_url;

        run.enter(RunState::Fetching);
        let content = self
            .fetcher
            .fetch(url, command.strategy.policy.as_ref())
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "fetch failed");
                Failure::before_dispatch(AbortReason::Fetch(e.kind), fetch_failure_text(e.kind, url))
            })?;
        let skipped = content.skipped;

        // Not before fetching: the orphan sweep ages directories by mtime.
        let space = ScratchSpace::create(&self.scratch_root).map_err(|e| {
            warn!(error = %e, "could not create scratch space");
            Failure::before_dispatch(AbortReason::Scratch, GENERIC_FAILURE.to_string())
        })?;
        let scratch = scratch.insert(space);

        run.enter(RunState::Assembling);
        let assembler = self.assembler.clone();
        let job = command.job.clone();
        let kind = command.strategy.assembly;
        let out_dir = scratch.path().to_path_buf();
        let assembled = tokio::task::spawn_blocking(move || {
            assembler.assemble(kind, &job, &content, &out_dir)
        })
        .await;
        let assembly = match assembled {
            Ok(Ok(a)) => a,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "assembly failed");
                return Err(Failure::before_dispatch(
                    AbortReason::Assembly,
                    assembly_failure_text(&e, url),
                ));
            }
            Err(e) => {
                warn!(error = %e, "assembly task failed");
                return Err(Failure::before_dispatch(
                    AbortReason::Assembly,
                    GENERIC_FAILURE.to_string(),
                ));
            }
        };

        let total = assembly.artifacts.len();
        let mut sent = 0;
        for (i, artifact) in assembly.artifacts.iter().enumerate() {
            run.enter(RunState::Dispatching {
                index: i + 1,
                total,
            });
            match self.dispatcher.send_artifact(user, artifact).await {
                DispatchOutcome::Sent => {
                    scratch::discard(&artifact.path);
                    sent += 1;
                }
                DispatchOutcome::QuotaExhausted { resets_in } => {
                    return Err(Failure {
                        reason: AbortReason::QuotaExhausted,
                        message: format!(
                            "{}\nSent {sent} of {total} file(s).",
                            limit_text(self.dispatcher.quota().ceiling(), resets_in)
                        ),
                        sent,
                        total,
                    });
                }
                outcome @ DispatchOutcome::Failed(_) => {
                    warn!(file = %artifact.file_name, detail = %outcome.detail(), "dispatch failed");
                    return Err(Failure {
                        reason: AbortReason::Dispatch,
                        message: format!(
                            "Failed to send file {} of {total}. Please try again later.\nSent {sent} of {total} file(s).",
                            i + 1
                        ),
                        sent,
                        total,
                    });
                }
            }
        }

        Ok(Delivered {
            sent,
            skipped,
            dropped: assembly.dropped.len(),
        })
    }

    /// Best-effort status text; failures are logged by the dispatcher.
    async fn notify(&self, user: &UserId, text: &str) {
        self.dispatcher.send_text(user, text).await;
    }
}

/// [`EventSink`] that runs every event as its own tracked task.
#[derive(Clone)]
pub struct PipelineSink {
    pipeline: Arc<Pipeline>,
    runs: TaskTracker,
}

impl PipelineSink {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            runs: TaskTracker::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    /// Wait up to `grace` for every submitted run to finish. Returns `false`
    /// if runs were still in flight when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.runs.close();
        let pending = self.runs.len();
        if pending > 0 {
            info!(pending, "waiting for in-flight runs");
        }
        let finished = tokio::time::timeout(grace, self.runs.wait()).await.is_ok();
        if !finished {
            warn!(abandoned = self.runs.len(), "shutdown grace elapsed with runs in flight");
        }
        finished
    }
}

impl EventSink for PipelineSink {
    fn submit(&self, event: InboundEvent) {
        let pipeline = self.pipeline.clone();
        let span = info_span!("run", event_id = %event.event_id, user = %event.sender_id);
        self.runs.spawn(
            async move {
                let report = pipeline.handle(event).await;
                debug!(state = %report.state, sent = report.sent, total = report.total, "run finished");
            }
            .instrument(span),
        );
    }
}

fn describe(command: &Command) -> String {
    let job = &command.job;
    match command.strategy.assembly {
        AssemblyKind::PaginatedDocument => format!("{} {}", job.derived_title, display_label(job)),
        AssemblyKind::ChunkedPayload => job.source_url.clone(),
    }
}

fn limit_text(ceiling: u64, wait: Option<Duration>) -> String {
    match wait {
        Some(d) => format!(
            "Media message limit reached: you have used all {ceiling} media messages for now. Please try again in {}.",
            format_wait(d)
        ),
        None => format!(
            "Media message limit reached: you have used all {ceiling} media messages for now. Please try again later."
        ),
    }
}

fn fetch_failure_text(kind: FetchErrorKind, url: &str) -> String {
    match kind {
        FetchErrorKind::Unreachable => {
            format!("Could not reach {url}. Please check the link and try again.")
        }
        FetchErrorKind::ParseFailure => format!("Could not read the content at {url}."),
        FetchErrorKind::EmptyResult => format!("No content found at {url}."),
    }
}

fn assembly_failure_text(e: &AssemblyError, url: &str) -> String {
    match e {
        AssemblyError::EmptyInput => format!("No content found at {url}."),
        AssemblyError::NothingDeliverable { dropped } => format!(
            "None of the {} item(s) found at {url} could be packaged: each was unreadable or over the size limit.",
            dropped.len()
        ),
        AssemblyError::Io(_) | AssemblyError::Serialize(_) => GENERIC_FAILURE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use regex::Regex;

    use super::*;
    use crate::{
        dispatch::tests::{Call, FakePort},
        domain::SubResource,
        fetch::{
            tests::{FakeSource, TokenPolicy},
            FetchError, PageSource, Strategy,
        },
        store::{idempotency::tests::DownStore, KvStore, MemoryStore, QuotaTracker},
    };

    const CEILING: u64 = 12;
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    struct Harness {
        pipeline: Pipeline,
        source: Arc<FakeSource>,
        port: Arc<FakePort>,
        quota: QuotaTracker,
        scratch_root: tempfile::TempDir,
    }

    fn registry() -> StrategyRegistry {
        let mut r = StrategyRegistry::new();
        r.register(Strategy {
            name: "chapter".into(),
            prefix: None,
            pattern: Regex::new(r"^https://comics\.example/manga/[^/]+/[^/]+/?$").unwrap(),
            policy: Arc::new(TokenPolicy),
            assembly: AssemblyKind::PaginatedDocument,
            usage: "a chapter URL".into(),
        })
        .register(Strategy {
            name: "page".into(),
            prefix: Some("fetch:".into()),
            pattern: Regex::new(r"^https?://").unwrap(),
            policy: Arc::new(TokenPolicy),
            assembly: AssemblyKind::ChunkedPayload,
            usage: "fetch:<url>".into(),
        });
        r
    }

    fn harness_with(
        source: FakeSource,
        dedup: Arc<dyn KvStore>,
        document_limit: usize,
    ) -> Harness {
        let source = Arc::new(source);
        let port = Arc::new(FakePort::default());
        let quota = QuotaTracker::new(Arc::new(MemoryStore::new()), CEILING, DAY);
        let scratch_root = tempfile::tempdir().unwrap();

        let pipeline = Pipeline::new(
            IdempotencyStore::new(dedup, Duration::from_secs(3600)),
            Dispatcher::new(port.clone(), quota.clone()),
            ContentFetcher::new(source.clone(), Duration::ZERO),
            registry(),
            Assembler::new(document_limit, 1000 * 1024),
            scratch_root.path().to_path_buf(),
        );
        Harness {
            pipeline,
            source,
            port,
            quota,
            scratch_root,
        }
    }

    fn harness(source: FakeSource) -> Harness {
        harness_with(source, Arc::new(MemoryStore::new()), 100 * 1024 * 1024)
    }

    fn page_with_images(url: &str, n: usize) -> FakeSource {
        let mut src = FakeSource::default();
        let tokens: Vec<String> = (0..n).map(|i| format!("img:https://cdn.example/{i}.png")).collect();
        src.pages.insert(url.into(), tokens.join(" "));
        for i in 0..n {
            src.resources.insert(
                format!("https://cdn.example/{i}.png"),
                crate::assemble::document::tests::png(12, 10 + i as u32, (i * 50) as u8),
            );
        }
        src
    }

    fn user() -> UserId {
        UserId("15550001111".into())
    }

    fn scratch_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.scratch_root.path()).unwrap().count() == 0
    }

    #[tokio::test]
    async fn scenario_a_page_fetch_sends_one_document() {
        let h = harness(page_with_images("https://example.com/x", 3));

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.A", user().0, "fetch:example.com/x"))
            .await;

        assert_eq!(report.state, RunState::Done);
        assert_eq!((report.sent, report.total), (1, 1));
        assert_eq!(h.port.documents().len(), 1);
        assert_eq!(h.quota.used(&user()).await.unwrap(), 1);

        let texts = h.port.texts();
        assert_eq!(texts.first().unwrap(), "Starting to process https://example.com/x");
        let last = texts.last().unwrap();
        assert!(last.contains(&format!("{} media messages remaining", CEILING - 1)), "{last}");
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn chapter_becomes_pdf_with_caption() {
        let h = harness(page_with_images("https://comics.example/manga/one-piece/1090", 3));

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.P", user().0, "https://comics.example/manga/one-piece/1090"))
            .await;
        assert_eq!(report.state, RunState::Done);

        let calls = h.port.calls();
        assert!(matches!(
            &calls[1],
            Call::Upload { file_name, media_type, .. }
                if file_name == "One_Piece_Chapter_1090.pdf" && media_type == "application/pdf"
        ));
        assert!(matches!(
            &h.port.documents()[0],
            Call::Document { caption, .. } if caption == "One Piece - Chapter 1090"
        ));
        assert_eq!(h.port.texts()[0], "Starting to process One Piece Chapter 1090");
    }

    #[tokio::test]
    async fn scenario_b_redelivery_has_no_effect() {
        let h = harness(page_with_images("https://example.com/x", 3));
        let event = InboundEvent::text("wamid.B", user().0, "fetch:example.com/x");

        h.pipeline.handle(event.clone()).await;
        let fetches = h.source.calls();
        let port_calls = h.port.calls().len();
        let used = h.quota.used(&user()).await.unwrap();

        let report = h.pipeline.handle(event).await;
        assert_eq!(report.state, RunState::Aborted(AbortReason::Duplicate));
        assert_eq!(h.source.calls(), fetches);
        assert_eq!(h.port.calls().len(), port_calls);
        assert_eq!(h.quota.used(&user()).await.unwrap(), used);
    }

    #[tokio::test]
    async fn concurrent_redelivery_runs_once() {
        let h = harness(page_with_images("https://example.com/x", 1));
        let event = InboundEvent::text("wamid.C2", user().0, "fetch:example.com/x");

        let (a, b) = tokio::join!(h.pipeline.handle(event.clone()), h.pipeline.handle(event));
        let done = [a, b].iter().filter(|r| r.state == RunState::Done).count();
        assert_eq!(done, 1);
        assert_eq!(h.port.documents().len(), 1);
    }

    #[tokio::test]
    async fn scenario_c_exhausted_user_gets_one_text_and_no_fetch() {
        let h = harness(page_with_images("https://example.com/x", 3));
        for _ in 0..CEILING {
            assert!(h.quota.try_consume(&user()).await.unwrap());
        }

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.C", user().0, "fetch:example.com/x"))
            .await;

        assert_eq!(report.state, RunState::Aborted(AbortReason::QuotaExhausted));
        assert_eq!(h.source.calls(), 0);
        let calls = h.port.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::Text { text, .. } if text.contains("limit reached")));
    }

    #[tokio::test]
    async fn scenario_d_empty_source_reports_no_content() {
        let mut src = FakeSource::default();
        src.pages.insert("https://example.com/x".into(), "no images".into());
        let h = harness(src);

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.D", user().0, "fetch:example.com/x"))
            .await;

        assert_eq!(
            report.state,
            RunState::Aborted(AbortReason::Fetch(FetchErrorKind::EmptyResult))
        );
        assert!(h.port.calls().iter().all(|c| matches!(c, Call::Text { .. })));
        let texts = h.port.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].starts_with("No content found"));
        assert_eq!(h.quota.used(&user()).await.unwrap(), 0);
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn unreachable_source_names_the_failure() {
        let h = harness(FakeSource::default());
        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.U", user().0, "fetch:example.com/gone"))
            .await;
        assert_eq!(
            report.state,
            RunState::Aborted(AbortReason::Fetch(FetchErrorKind::Unreachable))
        );
        assert!(h.port.texts()[1].starts_with("Could not reach https://example.com/gone"));
    }

    #[tokio::test]
    async fn unrecognized_command_gets_hint_only() {
        let h = harness(FakeSource::default());
        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.H", user().0, "hello there"))
            .await;

        assert_eq!(report.state, RunState::Aborted(AbortReason::UnrecognizedCommand));
        assert_eq!(h.source.calls(), 0);
        let texts = h.port.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("fetch:<url>"));
        assert_eq!(h.quota.used(&user()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_text_and_dedup_failure_are_silent() {
        let h = harness(FakeSource::default());
        let mut image = InboundEvent::text("wamid.I", user().0, "");
        image.payload_kind = PayloadKind::Other("image".into());
        let report = h.pipeline.handle(image).await;
        assert_eq!(report.state, RunState::Aborted(AbortReason::NotText));

        let down = harness_with(FakeSource::default(), Arc::new(DownStore), 1024);
        let report = down
            .pipeline
            .handle(InboundEvent::text("wamid.X", user().0, "fetch:example.com/x"))
            .await;
        assert_eq!(report.state, RunState::Aborted(AbortReason::DedupUnavailable));

        assert!(h.port.calls().is_empty());
        assert!(down.port.calls().is_empty());
        assert_eq!(down.source.calls(), 0);
    }

    fn one_page_per_document_limit() -> usize {
        (0..3)
            .map(|i| {
                let png = crate::assemble::document::tests::png(12, 10 + i, (i * 50) as u8);
                crate::assemble::document::normalize_page(&png, crate::assemble::document::DEFAULT_JPEG_QUALITY)
                    .unwrap()
                    .cost()
            })
            .max()
            .unwrap()
            + crate::assemble::document::DOC_OVERHEAD
    }

    #[tokio::test]
    async fn quota_refusal_mid_sequence_keeps_sent_parts() {
        let h = harness_with(
            page_with_images("https://comics.example/manga/one-piece/7", 3),
            Arc::new(MemoryStore::new()),
            one_page_per_document_limit(),
        );
        for _ in 0..CEILING - 1 {
            h.quota.try_consume(&user()).await.unwrap();
        }

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.Q", user().0, "https://comics.example/manga/one-piece/7"))
            .await;

        assert_eq!(report.state, RunState::Aborted(AbortReason::QuotaExhausted));
        assert_eq!((report.sent, report.total), (1, 3));
        assert_eq!(h.port.documents().len(), 1);
        assert!(h.port.texts().last().unwrap().contains("Sent 1 of 3"));
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn dispatch_failure_aborts_remaining_parts() {
        let h = harness_with(
            page_with_images("https://comics.example/manga/one-piece/8", 3),
            Arc::new(MemoryStore::new()),
            one_page_per_document_limit(),
        );
        h.port.fail_document_nth.store(2, Ordering::SeqCst);

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.F", user().0, "https://comics.example/manga/one-piece/8"))
            .await;

        assert_eq!(report.state, RunState::Aborted(AbortReason::Dispatch));
        assert_eq!((report.sent, report.total), (1, 3));
        assert_eq!(h.port.documents().len(), 2);
        assert_eq!(h.quota.used(&user()).await.unwrap(), 1);
        let last = h.port.texts().last().unwrap().clone();
        assert!(last.starts_with("Failed to send file 2 of 3"), "{last}");
        assert!(last.contains("Sent 1 of 3"), "{last}");
        assert!(!last.contains("status 400"), "{last}");
        assert!(scratch_is_empty(&h));
    }

    /// Records how many entries the scratch root holds whenever the origin
    /// is contacted.
    struct ScratchWatchingSource {
        inner: FakeSource,
        root: PathBuf,
        seen: std::sync::Mutex<Vec<usize>>,
    }

    impl ScratchWatchingSource {
        fn look(&self) {
            let n = std::fs::read_dir(&self.root).unwrap().count();
            self.seen.lock().unwrap().push(n);
        }
    }

    #[async_trait::async_trait]
    impl PageSource for ScratchWatchingSource {
        async fn get_page(&self, url: &str) -> Result<String, FetchError> {
            self.look();
            self.inner.get_page(url).await
        }

        async fn get_resource(&self, url: &str) -> Result<SubResource, FetchError> {
            self.look();
            self.inner.get_resource(url).await
        }
    }

    #[tokio::test]
    async fn scratch_space_is_created_after_fetching() {
        let scratch_root = tempfile::tempdir().unwrap();
        let source = Arc::new(ScratchWatchingSource {
            inner: page_with_images("https://comics.example/manga/one-piece/9", 3),
            root: scratch_root.path().to_path_buf(),
            seen: Default::default(),
        });
        let port = Arc::new(FakePort::default());
        let quota = QuotaTracker::new(Arc::new(MemoryStore::new()), CEILING, DAY);
        let pipeline = Pipeline::new(
            IdempotencyStore::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600)),
            Dispatcher::new(port.clone(), quota),
            ContentFetcher::new(source.clone(), Duration::ZERO),
            registry(),
            Assembler::new(100 * 1024 * 1024, 1000 * 1024),
            scratch_root.path().to_path_buf(),
        );

        let report = pipeline
            .handle(InboundEvent::text("wamid.S", user().0, "https://comics.example/manga/one-piece/9"))
            .await;

        assert_eq!(report.state, RunState::Done);
        let seen = source.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|&n| n == 0), "{seen:?}");
        assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_submitted_runs() {
        let Harness {
            pipeline,
            port,
            scratch_root: _scratch_root,
            ..
        } = harness(page_with_images("https://example.com/x", 2));
        let sink = PipelineSink::new(Arc::new(pipeline));

        sink.submit(InboundEvent::text("wamid.W", user().0, "fetch:example.com/x"));
        assert!(sink.drain(Duration::from_secs(5)).await);

        assert_eq!(sink.in_flight(), 0);
        assert_eq!(port.documents().len(), 1);
        assert!(port.texts().last().unwrap().contains("remaining"));
    }

    #[tokio::test]
    async fn failing_status_texts_do_not_stop_the_run() {
        let h = harness(page_with_images("https://example.com/x", 2));
        h.port.fail_text.store(true, Ordering::SeqCst);

        let report = h
            .pipeline
            .handle(InboundEvent::text("wamid.T", user().0, "fetch:example.com/x"))
            .await;
        assert_eq!(report.state, RunState::Done);
        assert_eq!(h.port.documents().len(), 1);
    }
}

//! Position-driven pagination over a [`PagedSource`]
//!
//! The pager owns the `(position, page_size)` state of one target and turns
//! page failures into shrink, skip or fatal decisions through the
//! [`FailurePolicy`]. Requests are strictly sequential.
//!
//! Every call to [`Pager::next_batch`] either yields the features of one
//! successful page, or reports that the target is finished. Within a run the
//! position always equals `resume + yielded + skipped`, which is what makes
//! the line count of the output stream a valid resume point.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::policy::{FailurePolicy, Step};
use crate::source::{Feature, PageRequest, PagedSource, PagingMode, QueryFilter};

/// Per-target paging settings
#[derive(Debug, Clone, PartialEq)]
pub struct PagerOptions {
    /// Page size requested whenever the pager is not shrinking
    pub nominal_page_size: u32,
    /// Stop after this many features in this run
    pub max_items: Option<u64>,
    pub filter: QueryFilter,
}

/// Drives one [`PagedSource`] from a resume position to exhaustion
pub struct Pager {
    source: Arc<dyn PagedSource>,
    mode: PagingMode,
    policy: FailurePolicy,
    options: PagerOptions,
    resume: u64,
    position: u64,
    page_size: u32,
    yielded: u64,
    skipped: Vec<u64>,
    fetches: u64,
    /// Position at which a re-probe at nominal size is in progress
    reprobe_from: Option<u64>,
    done: bool,
}

impl Pager {
    pub fn new(
        source: Arc<dyn PagedSource>,
        policy: FailurePolicy,
        options: PagerOptions,
        resume: u64,
    ) -> Self {
        let mode = source.paging_mode();
        let page_size = options.nominal_page_size.max(1);
        Self {
            source,
            mode,
            policy,
            options,
            resume,
            position: resume,
            page_size,
            yielded: 0,
            skipped: Vec::new(),
            fetches: 0,
            reprobe_from: None,
            done: false,
        }
    }

    /// Next upstream position to be requested
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Features yielded in this run
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Positions abandoned in this run, in the order they were skipped
    pub fn skipped(&self) -> &[u64] {
        &self.skipped
    }

    /// Page requests issued in this run, failed ones included
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn nominal(&self) -> u32 {
        self.options.nominal_page_size.max(1)
    }

    /// Page size that counts as nominal for the next request: the configured
    /// size clamped to what is left of the max-items cap
    fn effective_nominal(&self) -> Option<u32> {
        match self.options.max_items {
            None => Some(self.nominal()),
            Some(cap) => {
                let remaining = cap.saturating_sub(self.yielded);
                if remaining == 0 {
                    None
                } else {
                    Some(u64::from(self.nominal()).min(remaining) as u32)
                }
            },
        }
    }

    fn finish(&mut self) -> Option<Vec<Feature>> {
        self.done = true;
        None
    }

    fn check_position(&self) {
        debug_assert_eq!(
            self.position,
            self.resume + self.yielded + self.skipped.len() as u64,
            "position out of step with appended and skipped records"
        );
    }

    /// Fetch the next non-empty page
    ///
    /// Returns `Ok(None)` once the target is exhausted or the max-items cap
    /// is reached. After an error the pager is finished and further calls
    /// return `Ok(None)` without issuing requests.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Feature>>> {
        let label = self.source.label();

        loop {
            if self.done {
                return Ok(None);
            }

            let Some(nominal) = self.effective_nominal() else {
                info!(target_label = %label, position = self.position, yielded = self.yielded, "Reached max-items cap");
                return Ok(self.finish());
            };
            let size = self.page_size.min(nominal);

            let request = PageRequest {
                position: self.position,
                page_size: size,
                filter: self.options.filter.clone(),
            };
            self.fetches += 1;

            match self.source.next_page(&request).await {
                Ok(page) if page.features.is_empty() => {
                    if size >= nominal {
                        debug!(target_label = %label, position = self.position, "Empty page at nominal size, target exhausted");
                        return Ok(self.finish());
                    }
                    if self.reprobe_from == Some(self.position) {
                        warn!(
                            target_label = %label,
                            position = self.position,
                            page_size = size,
                            "Empty page at shrunk size again after re-probe, treating target as exhausted"
                        );
                        return Ok(self.finish());
                    }
                    info!(
                        target_label = %label,
                        position = self.position,
                        page_size = size,
                        nominal,
                        "Empty page at shrunk size, re-probing at nominal size"
                    );
                    self.reprobe_from = Some(self.position);
                    self.page_size = self.nominal();
                },
                Ok(page) => {
                    let mut features = page.features;
                    if let Some(cap) = self.options.max_items {
                        let remaining = cap.saturating_sub(self.yielded);
                        features.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
                    }

                    let count = features.len() as u64;
                    self.position += count;
                    self.yielded += count;
                    self.page_size = self.nominal();
                    self.reprobe_from = None;
                    self.check_position();

                    return Ok(Some(features));
                },
                Err(err) => {
                    if let Err(fatal) = self.on_failure(&label, size, err) {
                        self.done = true;
                        return Err(fatal);
                    }
                },
            }
        }
    }

    /// Apply the failure policy to a failed page request
    ///
    /// `Ok(())` means paging continues from the updated state.
    fn on_failure(&mut self, label: &str, size: u32, err: IngestError) -> Result<()> {
        if self.mode == PagingMode::Fixed || !err.is_shrinkable() {
            warn!(target_label = %label, position = self.position, page_size = size, error = %err, "Page request failed");
            return Err(err);
        }

        match self.policy.after_page(self.position, size, self.skipped.len()) {
            Step::Shrink(next) => {
                warn!(
                    target_label = %label,
                    position = self.position,
                    page_size = size,
                    next_page_size = next,
                    error = %err,
                    "Page request failed, shrinking page"
                );
                self.page_size = next;
                Ok(())
            },
            Step::Skip(position) => {
                warn!(
                    target_label = %label,
                    position,
                    skipped = self.skipped.len() + 1,
                    error = %err,
                    "Single record keeps failing, skipping position"
                );
                self.skip(position);
                Ok(())
            },
            Step::Retry(_) | Step::Fatal => {
                let position = self.position;
                self.skip(position);
                Err(IngestError::SkipCeilingExceeded {
                    skipped: self.skipped.len(),
                    position,
                    last_error: err.to_string(),
                })
            },
        }
    }

    fn skip(&mut self, position: u64) {
        self.skipped.push(position);
        self.position = position + 1;
        self.page_size = self.nominal();
        self.reprobe_from = None;
        self.check_position();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::FetchFailure;
    use crate::source::PageResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// What a scripted source does with one request
    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Outcome {
        Serve,
        Empty,
        Fail,
        NotFound,
    }

    type Rule = Box<dyn Fn(&PageRequest, usize) -> Outcome + Send + Sync>;

    /// In-memory collection of `total` features `{"id": n}`
    struct Scripted {
        total: u64,
        mode: PagingMode,
        rule: Rule,
        requests: Mutex<Vec<(u64, u32)>>,
    }

    impl Scripted {
        fn new(total: u64, rule: impl Fn(&PageRequest, usize) -> Outcome + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                total,
                mode: PagingMode::Adaptive,
                rule: Box::new(rule),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn clean(total: u64) -> Arc<Self> {
            Self::new(total, |_, _| Outcome::Serve)
        }

        /// Any page covering one of `bad` fails
        fn poisoned(total: u64, bad: &'static [u64]) -> Arc<Self> {
            Self::new(total, move |req, _| {
                let end = req.position + u64::from(req.page_size);
                if bad.iter().any(|b| (req.position..end).contains(b)) {
                    Outcome::Fail
                } else {
                    Outcome::Serve
                }
            })
        }

        fn requests(&self) -> Vec<(u64, u32)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PagedSource for Scripted {
        fn label(&self) -> String {
            "scripted".into()
        }

        fn paging_mode(&self) -> PagingMode {
            self.mode
        }

        async fn next_page(&self, request: &PageRequest) -> Result<PageResult> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push((request.position, request.page_size));
                requests.len() - 1
            };

            match (self.rule)(request, call) {
                Outcome::Serve => {
                    let end = (request.position + u64::from(request.page_size)).min(self.total);
                    let features = (request.position..end)
                        .map(|id| crate::source::Feature::new(json!({"id": id}).as_object().unwrap().clone()))
                        .collect();
                    Ok(PageResult::new(features))
                },
                Outcome::Empty => Ok(PageResult::new(Vec::new())),
                Outcome::Fail => Err(IngestError::FatalFetch {
                    url: "scripted".into(),
                    failure: FetchFailure::Decode("EOF while parsing a value".into()),
                    attempts: 1,
                }),
                Outcome::NotFound => Err(IngestError::FatalFetch {
                    url: "scripted".into(),
                    failure: FetchFailure::Status(404),
                    attempts: 1,
                }),
            }
        }
    }

    fn policy(skip_ceiling: usize) -> FailurePolicy {
        FailurePolicy {
            max_retries: 0,
            backoff_base: Duration::ZERO,
            skip_ceiling,
        }
    }

    fn options(nominal: u32) -> PagerOptions {
        PagerOptions {
            nominal_page_size: nominal,
            max_items: None,
            filter: QueryFilter::default(),
        }
    }

    async fn drain(pager: &mut Pager) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        while let Some(batch) = pager.next_batch().await? {
            ids.extend(batch.iter().map(|f| f.get("id").unwrap().as_u64().unwrap()));
        }
        Ok(ids)
    }

    #[tokio::test]
    async fn test_clean_run_yields_everything_in_order() {
        let source = Scripted::clean(23);
        let mut pager = Pager::new(source.clone(), policy(50), options(5), 0);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids, (0..23).collect::<Vec<_>>());
        // ceil(23 / 5) data pages plus the empty page proving exhaustion
        assert_eq!(pager.fetches(), 5 + 1);
        assert!(pager.skipped().is_empty());
        assert_eq!(pager.position(), 23);
    }

    #[tokio::test]
    async fn test_resume_starts_at_position() {
        let source = Scripted::clean(10);
        let mut pager = Pager::new(source.clone(), policy(50), options(4), 7);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids, vec![7, 8, 9]);
        assert_eq!(source.requests()[0], (7, 4));
    }

    #[tokio::test]
    async fn test_shrinks_to_one_then_skips() {
        let source = Scripted::poisoned(100, &[37]);
        let mut pager = Pager::new(source.clone(), policy(50), options(50), 0);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids.len(), 99);
        assert!(!ids.contains(&37));
        assert_eq!(pager.skipped(), &[37]);

        let at_37: Vec<u32> = source
            .requests()
            .iter()
            .filter(|(pos, _)| *pos == 37)
            .map(|(_, size)| *size)
            .collect();
        assert_eq!(at_37, vec![50, 25, 12, 6, 3, 1]);
        assert!(source.requests().iter().all(|(_, size)| (1..=50).contains(size)));
    }

    #[tokio::test]
    async fn test_skip_ceiling_aborts_without_further_requests() {
        let source = Scripted::poisoned(20, &[2, 4, 6, 8]);
        let mut pager = Pager::new(source.clone(), policy(3), options(1), 0);

        let err = drain(&mut pager).await.unwrap_err();
        match err {
            IngestError::SkipCeilingExceeded { skipped, position, .. } => {
                assert_eq!(skipped, 3);
                assert_eq!(position, 6);
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pager.skipped(), &[2, 4, 6]);

        let issued = source.requests().len();
        assert!(pager.next_batch().await.unwrap().is_none());
        assert_eq!(source.requests().len(), issued);
        assert_eq!(source.requests().last(), Some(&(6, 1)));
    }

    #[tokio::test]
    async fn test_fewer_skips_than_ceiling_completes() {
        let source = Scripted::poisoned(10, &[3, 7]);
        let mut pager = Pager::new(source, policy(3), options(2), 0);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        assert_eq!(pager.skipped(), &[3, 7]);
    }

    #[tokio::test]
    async fn test_fixed_mode_failure_is_fatal() {
        let source = Arc::new(Scripted {
            total: 30,
            mode: PagingMode::Fixed,
            rule: Box::new(|req: &PageRequest, _: usize| {
                if req.position == 10 {
                    Outcome::Fail
                } else {
                    Outcome::Serve
                }
            }),
            requests: Mutex::new(Vec::new()),
        });
        let mut pager = Pager::new(source.clone(), policy(50), options(10), 0);

        assert_eq!(pager.next_batch().await.unwrap().map(|b| b.len()), Some(10));
        assert!(matches!(
            pager.next_batch().await,
            Err(IngestError::FatalFetch { .. })
        ));
        assert_eq!(source.requests(), vec![(0, 10), (10, 10)]);
        assert!(pager.skipped().is_empty());
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_fatal_without_shrinking() {
        let source = Scripted::new(30, |_, _| Outcome::NotFound);
        let mut pager = Pager::new(source.clone(), policy(50), options(10), 0);

        assert!(matches!(
            pager.next_batch().await,
            Err(IngestError::FatalFetch { failure: FetchFailure::Status(404), .. })
        ));
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_at_shrunk_size_reprobes_at_nominal() {
        // Position 4 fails once at nominal size and answers empty once when
        // shrunk; the re-probe at nominal size finds the remaining records.
        let source = Scripted::new(12, |req, call| match (req.position, req.page_size, call) {
            (4, 4, 1) => Outcome::Fail,
            (4, 2, 2) => Outcome::Empty,
            _ => Outcome::Serve,
        });
        let mut pager = Pager::new(source.clone(), policy(50), options(4), 0);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        assert_eq!(
            source.requests(),
            vec![(0, 4), (4, 4), (4, 2), (4, 4), (8, 4), (12, 4)]
        );
    }

    #[tokio::test]
    async fn test_repeated_empty_after_reprobe_is_exhaustion() {
        let source = Scripted::new(10, |req, _| {
            if req.position >= 10 && req.page_size >= 4 {
                Outcome::Fail
            } else {
                Outcome::Serve
            }
        });
        let mut pager = Pager::new(source.clone(), policy(50), options(4), 0);

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids.len(), 10);
        assert!(pager.skipped().is_empty());
        assert_eq!(
            &source.requests()[3..],
            &[(10, 4), (10, 2), (10, 4), (10, 2)]
        );
    }

    #[tokio::test]
    async fn test_max_items_clamps_and_stops() {
        let source = Scripted::clean(100);
        let mut pager = Pager::new(
            source.clone(),
            policy(50),
            PagerOptions {
                max_items: Some(25),
                ..options(10)
            },
            0,
        );

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids.len(), 25);
        assert_eq!(source.requests(), vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[tokio::test]
    async fn test_oversized_page_is_truncated_to_cap() {
        // Serves more than asked for: the cap still holds
        struct Generous;

        #[async_trait]
        impl PagedSource for Generous {
            fn label(&self) -> String {
                "generous".into()
            }
            fn paging_mode(&self) -> PagingMode {
                PagingMode::Fixed
            }
            async fn next_page(&self, request: &PageRequest) -> Result<PageResult> {
                let features = (request.position..request.position + 50)
                    .map(|id| crate::source::Feature::new(json!({"id": id}).as_object().unwrap().clone()))
                    .collect();
                Ok(PageResult::new(features))
            }
        }

        let mut pager = Pager::new(
            Arc::new(Generous),
            policy(50),
            PagerOptions {
                max_items: Some(7),
                ..options(5)
            },
            0,
        );

        let ids = drain(&mut pager).await.unwrap();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
        assert_eq!(pager.position(), 7);
    }
}

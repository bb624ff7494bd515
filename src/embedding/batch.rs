/// Batch processor for cache-aware embedding generation
use super::progress::{BatchProgress, ProgressSnapshot};
use super::provider::{estimate_tokens, EmbeddingProvider, ProviderError};
use super::rate_limit::RateLimiter;
use crate::cache::RagCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Tuning knobs for [`BatchEmbeddingProcessor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Texts per provider request
    pub batch_size: usize,
    /// Provider requests in flight at once
    pub max_concurrent: usize,
    pub requests_per_minute: usize,
    pub tokens_per_minute: usize,
    /// Attempts per sub-batch, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_concurrent: 4,
            requests_per_minute: 3000,
            tokens_per_minute: 1_000_000,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Outcome for one input text
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingResult {
    /// Served from the cache
    Cached(Vec<f32>),
    /// Produced by the provider during this run
    Generated(Vec<f32>),
    /// Blank or word-less input, never sent anywhere
    Skipped,
    /// Provider gave up on this text
    Failed { error: String },
}

impl EmbeddingResult {
    pub fn vector(&self) -> Option<&[f32]> {
        match self {
            EmbeddingResult::Cached(v) | EmbeddingResult::Generated(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vec<f32>> {
        match self {
            EmbeddingResult::Cached(v) | EmbeddingResult::Generated(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EmbeddingResult::Failed { .. })
    }
}

/// Caller-supplied context attached to the batch's tracing span
#[derive(Debug, Clone, Default)]
pub struct BatchMetadata {
    pub label: Option<String>,
    pub document_id: Option<String>,
}

/// Result of one [`BatchEmbeddingProcessor::process`] call
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// One entry per input text, in input order
    pub embeddings: Vec<EmbeddingResult>,
    pub progress: ProgressSnapshot,
}

impl BatchOutput {
    pub fn failed(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_failed()).count()
    }
}

/// Turns arrays of text into vectors through an [`EmbeddingProvider`]
///
/// Cached vectors are reused, the rest is split into sub-batches that run
/// with bounded parallelism behind a shared rate limiter. A sub-batch that
/// keeps failing is flagged without affecting its siblings.
pub struct BatchEmbeddingProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<RagCache>,
    limiter: Arc<RateLimiter>,
    config: BatchConfig,
}

impl BatchEmbeddingProcessor {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<RagCache>, config: BatchConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_minute,
            config.tokens_per_minute,
        ));
        Self {
            provider,
            cache,
            limiter,
            config,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Embed `texts`, preserving order and length
    pub async fn process(&self, texts: &[String], metadata: Option<&BatchMetadata>) -> BatchOutput {
        let progress = Arc::new(BatchProgress::new(texts.len()));
        self.process_with_progress(texts, metadata, progress).await
    }

    /// Same as [`process`](Self::process), reporting into a caller-owned
    /// progress tracker that may be polled from another task
    pub async fn process_with_progress(
        &self,
        texts: &[String],
        metadata: Option<&BatchMetadata>,
        progress: Arc<BatchProgress>,
    ) -> BatchOutput {
        let span = info_span!(
            "embed_batch",
            label = metadata.and_then(|m| m.label.as_deref()).unwrap_or(""),
            document_id = metadata.and_then(|m| m.document_id.as_deref()).unwrap_or(""),
            total = texts.len(),
        );

        async move {
            progress.reset_total(texts.len());
            let mut slots: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];

            let mut candidates = Vec::with_capacity(texts.len());
            for (idx, text) in texts.iter().enumerate() {
                if !has_words(text) {
                    warn!("Skipping text without words at position {}", idx);
                    slots[idx] = Some(EmbeddingResult::Skipped);
                    progress.add_skipped(1);
                } else {
                    candidates.push(idx);
                }
            }

            let pending = self.resolve_cached(texts, &candidates, &mut slots, &progress).await;

            info!(
                "Embedding {} texts ({} cached, {} to generate)",
                texts.len(),
                candidates.len() - pending.len(),
                pending.len()
            );

            let generated = self.generate(texts, &pending, &mut slots, &progress).await;
            if !generated.is_empty() {
                self.cache
                    .set_embeddings(&generated, self.provider.model_id())
                    .await;
            }

            let embeddings: Vec<EmbeddingResult> = slots
                .into_iter()
                .map(|slot| {
                    slot.unwrap_or_else(|| {
                        progress.add_failed(1);
                        EmbeddingResult::Failed {
                            error: "embedding task did not complete".to_string(),
                        }
                    })
                })
                .collect();

            let snapshot = progress.snapshot();
            info!(
                "Batch complete: {} cached, {} generated, {} failed, {} skipped in {}ms",
                snapshot.cached, snapshot.generated, snapshot.failed, snapshot.skipped, snapshot.elapsed_ms
            );

            BatchOutput {
                embeddings,
                progress: snapshot,
            }
        }
        .instrument(span)
        .await
    }

    /// Fill cache hits into `slots`, returning the indices still to generate
    async fn resolve_cached(
        &self,
        texts: &[String],
        candidates: &[usize],
        slots: &mut [Option<EmbeddingResult>],
        progress: &BatchProgress,
    ) -> Vec<usize> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let lookup: Vec<String> = candidates.iter().map(|&i| texts[i].clone()).collect();
        let cached = self
            .cache
            .get_embeddings(&lookup, self.provider.model_id())
            .await;

        let dimension = self.provider.dimension();
        let mut pending = Vec::new();
        for (&idx, hit) in candidates.iter().zip(cached) {
            match hit {
                Some(vector) if vector.len() == dimension => {
                    slots[idx] = Some(EmbeddingResult::Cached(vector));
                    progress.add_cached(1);
                }
                Some(vector) => {
                    debug!(
                        "Ignoring cached vector of dimension {} (expected {})",
                        vector.len(),
                        dimension
                    );
                    pending.push(idx);
                }
                None => pending.push(idx),
            }
        }
        pending
    }

    /// Dispatch sub-batches and collect their results into `slots`
    ///
    /// Returns the (text, vector) pairs produced, ready for caching.
    async fn generate(
        &self,
        texts: &[String],
        pending: &[usize],
        slots: &mut [Option<EmbeddingResult>],
        progress: &BatchProgress,
    ) -> Vec<(String, Vec<f32>)> {
        let mut generated = Vec::new();
        if pending.is_empty() {
            return generated;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts.max(1),
            initial_backoff: self.config.initial_backoff,
        };
        let mut tasks = JoinSet::new();

        for indices in pending.chunks(self.config.batch_size.max(1)) {
            let indices = indices.to_vec();
            let batch: Vec<String> = indices.iter().map(|&i| texts[i].clone()).collect();
            let provider = Arc::clone(&self.provider);
            let limiter = Arc::clone(&self.limiter);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(
                async move {
                    let outcome = match semaphore.acquire_owned().await {
                        Ok(_permit) => {
                            embed_sub_batch(provider.as_ref(), &limiter, &batch, policy).await
                        }
                        Err(_) => vec![
                            Err(ProviderError::Unavailable(
                                "dispatch semaphore closed".to_string(),
                            ));
                            batch.len()
                        ],
                    };
                    (indices, batch, outcome)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            let (indices, batch, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Embedding task aborted: {}", e);
                    continue;
                }
            };

            for ((idx, text), result) in indices.into_iter().zip(batch).zip(outcome) {
                match result {
                    Ok(vector) => {
                        progress.add_generated(1);
                        generated.push((text, vector.clone()));
                        slots[idx] = Some(EmbeddingResult::Generated(vector));
                    }
                    Err(e) => {
                        warn!("Text at position {} not embedded: {}", idx, e);
                        progress.add_failed(1);
                        slots[idx] = Some(EmbeddingResult::Failed {
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        generated
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
}

/// Texts without a single alphanumeric character carry nothing to embed
fn has_words(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Embed one sub-batch, one result per text
///
/// A non-transient rejection of the whole request is narrowed down by
/// embedding each text on its own, so only the offending texts fail.
async fn embed_sub_batch(
    provider: &dyn EmbeddingProvider,
    limiter: &RateLimiter,
    texts: &[String],
    policy: RetryPolicy,
) -> Vec<Result<Vec<f32>, ProviderError>> {
    match embed_with_retry(provider, limiter, texts, policy).await {
        Ok(vectors) => vectors.into_iter().map(Ok).collect(),
        Err(e) if !e.is_transient() && texts.len() > 1 => {
            warn!(
                "Sub-batch of {} texts rejected ({}), embedding texts individually",
                texts.len(),
                e
            );
            let mut results = Vec::with_capacity(texts.len());
            for text in texts {
                let single = embed_with_retry(provider, limiter, std::slice::from_ref(text), policy)
                    .await
                    .and_then(|mut vectors| {
                        vectors.pop().ok_or_else(|| {
                            ProviderError::GenerationError("Empty embedding response".to_string())
                        })
                    });
                results.push(single);
            }
            results
        }
        Err(e) => {
            warn!("Sub-batch of {} texts failed: {}", texts.len(), e);
            vec![Err(e); texts.len()]
        }
    }
}

/// One sub-batch request with rate limiting and exponential backoff
async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    limiter: &RateLimiter,
    texts: &[String],
    policy: RetryPolicy,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let tokens: usize = texts.iter().map(|t| estimate_tokens(t)).sum();
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        let reservation = limiter.reserve(tokens).await;

        match provider.embed(texts).await {
            Ok(vectors) => return check_shape(provider, texts.len(), vectors),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                // A rejected call consumed a request slot but no tokens
                limiter.record_usage(&reservation, 0).await;
                debug!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, policy.max_attempts, e, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    limiter.record_usage(&reservation, 0).await;
                }
                return Err(e);
            }
        }
    }
}

fn check_shape(
    provider: &dyn EmbeddingProvider,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::GenerationError(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dimension()) {
        return Err(ProviderError::DimensionMismatch {
            expected: provider.dimension(),
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Encodes each text's length into a 3-dimensional vector
    #[derive(Default)]
    struct CountingProvider {
        texts_seen: AtomicUsize,
        calls: AtomicUsize,
        transient_failures: AtomicUsize,
        poison: Option<&'static str>,
        received: Mutex<Vec<String>>,
    }

    impl CountingProvider {
        fn failing_first(n: usize) -> Self {
            Self {
                transient_failures: AtomicUsize::new(n),
                ..Default::default()
            }
        }

        fn poisoned(word: &'static str) -> Self {
            Self {
                poison: Some(word),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProviderError::Timeout("slow upstream".to_string()));
            }
            if let Some(word) = self.poison {
                if texts.iter().any(|t| t.contains(word)) {
                    return Err(ProviderError::InvalidInput(format!("contains {}", word)));
                }
            }

            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            self.received.lock().unwrap().extend(texts.iter().cloned());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.0])
                .collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_id(&self) -> &str {
            "counting"
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn processor(provider: Arc<CountingProvider>, cache: Arc<RagCache>, config: BatchConfig) -> BatchEmbeddingProcessor {
        BatchEmbeddingProcessor::new(provider, cache, config)
    }

    #[tokio::test]
    async fn test_only_uncached_texts_are_generated() {
        let provider = Arc::new(CountingProvider::default());
        let cache = Arc::new(RagCache::in_memory());
        cache
            .set_embeddings(
                &[
                    ("beta".to_string(), vec![9.0, 9.0, 9.0]),
                    ("delta".to_string(), vec![8.0, 8.0, 8.0]),
                ],
                "counting",
            )
            .await;

        let config = BatchConfig {
            batch_size: 2,
            ..Default::default()
        };
        let proc = processor(Arc::clone(&provider), Arc::clone(&cache), config);
        let input = texts(&["alpha", "beta", "gamma", "delta", "epsilon"]);
        let output = proc.process(&input, None).await;

        assert_eq!(output.embeddings.len(), 5);
        assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(output.embeddings[1], EmbeddingResult::Cached(vec![9.0, 9.0, 9.0]));
        assert_eq!(output.embeddings[3], EmbeddingResult::Cached(vec![8.0, 8.0, 8.0]));
        assert_eq!(output.embeddings[0], EmbeddingResult::Generated(vec![5.0, 1.0, 0.0]));
        assert_eq!(output.embeddings[4], EmbeddingResult::Generated(vec![7.0, 1.0, 0.0]));
        assert_eq!(output.progress.cached, 2);
        assert_eq!(output.progress.generated, 3);
        assert!(output.progress.is_complete());

        // second pass is served entirely from the cache
        let again = proc.process(&input, None).await;
        assert_eq!(provider.texts_seen.load(Ordering::SeqCst), 3);
        assert!(again
            .embeddings
            .iter()
            .all(|e| matches!(e, EmbeddingResult::Cached(_))));
    }

    #[tokio::test]
    async fn test_blank_texts_are_skipped() {
        let provider = Arc::new(CountingProvider::default());
        let proc = processor(Arc::clone(&provider), Arc::new(RagCache::in_memory()), BatchConfig::default());

        let output = proc.process(&texts(&["one", "   ", "", "two"]), None).await;
        assert_eq!(output.embeddings[1], EmbeddingResult::Skipped);
        assert_eq!(output.embeddings[2], EmbeddingResult::Skipped);
        assert!(output.embeddings[0].vector().is_some());
        assert_eq!(output.progress.skipped, 2);
        assert_eq!(provider.received.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_texts_without_words_are_skipped() {
        let provider = Arc::new(CountingProvider::default());
        let proc = processor(Arc::clone(&provider), Arc::new(RagCache::in_memory()), BatchConfig::default());

        let output = proc.process(&texts(&["first", "---", "...", "second"]), None).await;
        assert_eq!(output.embeddings[1], EmbeddingResult::Skipped);
        assert_eq!(output.embeddings[2], EmbeddingResult::Skipped);
        assert_eq!(output.progress.skipped, 2);
        assert_eq!(output.progress.generated, 2);
        assert_eq!(*provider.received.lock().unwrap(), texts(&["first", "second"]));
    }

    #[tokio::test]
    async fn test_hash_embedder_batch_survives_separator_text() {
        let proc = BatchEmbeddingProcessor::new(
            Arc::new(crate::embedding::HashEmbedder::new(16)),
            Arc::new(RagCache::in_memory()),
            BatchConfig::default(),
        );

        let output = proc
            .process(&texts(&["Rust has ownership rules.", "***", "Cargo builds crates."]), None)
            .await;
        assert!(output.embeddings[0].vector().is_some());
        assert_eq!(output.embeddings[1], EmbeddingResult::Skipped);
        assert!(output.embeddings[2].vector().is_some());
        assert_eq!(output.failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(CountingProvider::failing_first(2));
        let proc = processor(Arc::clone(&provider), Arc::new(RagCache::in_memory()), BatchConfig::default());

        let output = proc.process(&texts(&["retry me"]), None).await;
        assert_eq!(output.embeddings[0], EmbeddingResult::Generated(vec![8.0, 1.0, 0.0]));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_mark_failure() {
        let provider = Arc::new(CountingProvider::failing_first(10));
        let config = BatchConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let proc = processor(Arc::clone(&provider), Arc::new(RagCache::in_memory()), config);

        let output = proc.process(&texts(&["doomed"]), None).await;
        assert!(output.embeddings[0].is_failed());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(output.failed(), 1);
    }

    #[tokio::test]
    async fn test_rejected_text_fails_alone() {
        let provider = Arc::new(CountingProvider::poisoned("poison"));
        let cache = Arc::new(RagCache::in_memory());
        let config = BatchConfig {
            batch_size: 2,
            ..Default::default()
        };
        let proc = processor(Arc::clone(&provider), Arc::clone(&cache), config);

        let input = texts(&["fine", "poison pill", "also fine", "still fine"]);
        let output = proc.process(&input, None).await;

        assert_eq!(output.embeddings[0], EmbeddingResult::Generated(vec![4.0, 1.0, 0.0]));
        assert!(output.embeddings[1].is_failed());
        assert_eq!(output.embeddings[2], EmbeddingResult::Generated(vec![9.0, 1.0, 0.0]));
        assert_eq!(output.embeddings[3], EmbeddingResult::Generated(vec![10.0, 1.0, 0.0]));
        assert_eq!(output.progress.failed, 1);
        assert_eq!(output.progress.generated, 3);

        // failures are never cached
        let cached = cache.get_embeddings(&input, "counting").await;
        assert!(cached[0].is_some());
        assert!(cached[1].is_none());
        assert!(cached[2].is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_spreads_requests() {
        let provider = Arc::new(CountingProvider::default());
        let config = BatchConfig {
            batch_size: 1,
            requests_per_minute: 1,
            ..Default::default()
        };
        let proc = processor(Arc::clone(&provider), Arc::new(RagCache::in_memory()), config);

        let start = tokio::time::Instant::now();
        let output = proc.process(&texts(&["a", "b", "c"]), None).await;

        assert_eq!(output.progress.generated, 3);
        assert!(start.elapsed() >= Duration::from_secs(120));
    }
}

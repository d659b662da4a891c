//! Extraction stage: pull the source site into the content cache.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::ContentCache;
use crate::error::MigrationError;
use crate::execution::CancelToken;
use crate::gateway::{ContentGateway, ItemRef};
use crate::runner::{gateway_call, with_retry, RetryPolicy};
use siteferry_types::asset::{content_hash, Asset};
use siteferry_types::plan::MigrationPlan;

/// Result of one extraction pass.
///
/// `first_error` carries the first permanent item failure; siblings keep
/// fetching regardless, so the asset list still reflects every item that
/// did succeed (work is resumable at the item level through the cache even
/// though the stage is all-or-nothing).
pub struct ExtractOutcome {
    /// Final asset set: one entry per item the source currently reports.
    pub assets: Vec<Asset>,
    pub cache_hits: u64,
    pub fetched: u64,
    /// Highest attempt count any single operation consumed.
    pub max_attempts_used: u32,
    pub first_error: Option<MigrationError>,
    /// A cancellation checkpoint fired before all items were scheduled.
    pub interrupted: bool,
}

struct FetchResult {
    item: ItemRef,
    bytes: Vec<u8>,
    hash: String,
    attempts: u32,
}

/// Whether an already-indexed asset lets us skip fetching `item`.
fn reusable<'a>(
    item: &ItemRef,
    existing: &'a [Asset],
    cache: &ContentCache,
) -> Option<&'a Asset> {
    let fingerprint = item.fingerprint.as_deref()?;
    let asset = existing
        .iter()
        .find(|a| a.kind == item.kind && a.source_path == item.path)?;
    (asset.content_hash == fingerprint && cache.contains(&asset.content_hash)).then_some(asset)
}

/// Run the extraction stage.
///
/// Lists items, fetches changed ones on a bounded worker pool, stores
/// payloads in the content cache, and returns the merged asset index.
/// Cancellation is honored between items, never mid-fetch.
pub async fn run_extract(
    plan: &MigrationPlan,
    existing: &[Asset],
    cache: &Arc<ContentCache>,
    content: &Arc<dyn ContentGateway>,
    policy: RetryPolicy,
    concurrency: usize,
    cancel: &CancelToken,
) -> ExtractOutcome {
    let source = plan.source.clone();
    let gateway = content.clone();
    let listing = with_retry(&policy, "list source items", move || {
        let gateway = gateway.clone();
        let source = source.clone();
        async move { gateway_call(move || gateway.list_items(&source)).await }
    })
    .await;

    let (items, mut max_attempts_used) = match listing {
        Ok((items, attempts)) => (items, attempts),
        Err((err, attempts)) => {
            return ExtractOutcome {
                assets: existing.to_vec(),
                cache_hits: 0,
                fetched: 0,
                max_attempts_used: attempts,
                first_error: Some(err),
                interrupted: false,
            };
        }
    };

    tracing::info!(
        source = plan.source.base_url,
        items = items.len(),
        concurrency,
        "Source listing complete, fetching changed items"
    );

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set: JoinSet<Result<FetchResult, (MigrationError, u32)>> = JoinSet::new();

    let mut assets: Vec<Asset> = Vec::with_capacity(items.len());
    let mut cache_hits = 0u64;

    let mut interrupted = false;
    for item in items {
        if cancel.is_cancelled() {
            tracing::warn!("Cancellation requested, not scheduling further fetches");
            interrupted = true;
            break;
        }

        if let Some(asset) = reusable(&item, existing, cache) {
            tracing::debug!(path = item.path, "Cache hit, skipping fetch");
            assets.push(asset.clone());
            cache_hits += 1;
            continue;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let gateway = content.clone();
        let policy_for_item = policy;
        join_set.spawn(async move {
            let _permit = permit;
            let path = item.path.clone();
            let op = format!("fetch {path}");
            let gateway_for_try = gateway.clone();
            let result = with_retry(&policy_for_item, &op, move || {
                let gateway = gateway_for_try.clone();
                let path = path.clone();
                async move { gateway_call(move || gateway.fetch(&path)).await }
            })
            .await;

            match result {
                Ok((fetched, attempts)) => {
                    // Hash locally; the gateway's digest is advisory.
                    let hash = content_hash(&fetched.bytes);
                    Ok(FetchResult {
                        item,
                        bytes: fetched.bytes,
                        hash,
                        attempts,
                    })
                }
                Err((err, attempts)) => Err((err, attempts)),
            }
        });
    }

    // Merge worker results on this task; JobState and the cache index are
    // never touched from inside the pool.
    let mut fetched = 0u64;
    let mut first_error: Option<MigrationError> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(result)) => {
                max_attempts_used = max_attempts_used.max(result.attempts);
                if let Err(e) = cache.put(&result.hash, &result.bytes) {
                    if first_error.is_none() {
                        first_error = Some(MigrationError::Infrastructure(e));
                    }
                    continue;
                }
                assets.push(Asset {
                    kind: result.item.kind,
                    source_path: result.item.path,
                    content_hash: result.hash,
                    size_bytes: result.bytes.len() as u64,
                    fetched_at: chrono::Utc::now().to_rfc3339(),
                });
                fetched += 1;
            }
            Ok(Err((err, attempts))) => {
                max_attempts_used = max_attempts_used.max(attempts);
                tracing::error!("Item fetch failed permanently: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error = Some(MigrationError::Infrastructure(anyhow::anyhow!(
                        "Fetch task panicked: {join_err}"
                    )));
                }
            }
        }
    }

    if interrupted {
        tracing::warn!(
            fetched,
            cache_hits,
            "Extraction interrupted by cancellation; fetched items remain cached"
        );
    }

    tracing::info!(fetched, cache_hits, total = assets.len(), "Extraction pass complete");

    ExtractOutcome {
        assets,
        cache_hits,
        fetched,
        max_attempts_used,
        first_error,
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FetchedItem;
    use siteferry_types::asset::AssetKind;
    use siteferry_types::error::GatewayError;
    use siteferry_types::plan::{
        ComputeSpec, FormRouting, FunctionSpec, ProcessingOptions, SourceRef, StorageSpec,
        TargetImage,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn plan() -> MigrationPlan {
        MigrationPlan {
            name: "demo".into(),
            source: SourceRef {
                base_url: "https://demo.example".into(),
                project_id: None,
            },
            compute: ComputeSpec {
                name: "w".into(),
                machine_type: "e2-small".into(),
                disk_gb: 10,
                image: TargetImage::DebianFamily,
            },
            storage: StorageSpec {
                bucket: "b".into(),
                location: "us".into(),
            },
            dns: None,
            function: FunctionSpec {
                name: "f".into(),
                runtime: "python312".into(),
                region: "us".into(),
            },
            forms: FormRouting {
                endpoint_path: "/api/forms".into(),
                notify_email: "x@demo.example".into(),
            },
            processing: ProcessingOptions::default(),
            host: siteferry_types::plan::HostOptions::default(),
            tls_email: None,
            dry_run: false,
        }
    }

    struct ScriptedContent {
        items: Vec<ItemRef>,
        payloads: std::collections::HashMap<String, Vec<u8>>,
        fail_path: Option<String>,
        fetch_calls: AtomicU32,
    }

    impl ScriptedContent {
        fn new(items: Vec<(&str, AssetKind, &[u8])>) -> Self {
            let payloads = items
                .iter()
                .map(|(p, _, b)| ((*p).to_string(), b.to_vec()))
                .collect();
            let items = items
                .into_iter()
                .map(|(p, k, b)| ItemRef {
                    path: p.to_string(),
                    kind: k,
                    fingerprint: Some(content_hash(b)),
                })
                .collect();
            Self {
                items,
                payloads,
                fail_path: None,
                fetch_calls: AtomicU32::new(0),
            }
        }
    }

    impl ContentGateway for ScriptedContent {
        fn check(&self) -> Result<(), GatewayError> {
            Ok(())
        }

        fn list_items(&self, _source: &SourceRef) -> Result<Vec<ItemRef>, GatewayError> {
            Ok(self.items.clone())
        }

        fn fetch(&self, path: &str) -> Result<FetchedItem, GatewayError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_path.as_deref() == Some(path) {
                return Err(GatewayError::not_found("GONE", format!("no item at {path}")));
            }
            let bytes = self.payloads[path].clone();
            let content_hash = content_hash(&bytes);
            Ok(FetchedItem { bytes, content_hash })
        }
    }

    fn cache() -> Arc<ContentCache> {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path()).unwrap();
        // Leak the tempdir so the cache outlives the binding in tests.
        std::mem::forget(dir);
        Arc::new(cache)
    }

    #[tokio::test]
    async fn fetches_all_items_into_cache() {
        let gw: Arc<dyn ContentGateway> = Arc::new(ScriptedContent::new(vec![
            ("/", AssetKind::Page, b"<html>home</html>"),
            ("/style.css", AssetKind::StaticResource, b"body{}"),
        ]));
        let cache = cache();
        let outcome = run_extract(
            &plan(),
            &[],
            &cache,
            &gw,
            RetryPolicy::default(),
            4,
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.first_error.is_none());
        assert_eq!(outcome.assets.len(), 2);
        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.cache_hits, 0);
        for asset in &outcome.assets {
            assert!(cache.contains(&asset.content_hash));
        }
    }

    #[tokio::test]
    async fn second_pass_skips_unchanged_items() {
        let scripted = ScriptedContent::new(vec![("/", AssetKind::Page, b"<html>home</html>")]);
        let gw: Arc<dyn ContentGateway> = Arc::new(scripted);
        let cache = cache();
        let plan = plan();

        let first = run_extract(
            &plan,
            &[],
            &cache,
            &gw,
            RetryPolicy::default(),
            4,
            &CancelToken::new(),
        )
        .await;
        assert_eq!(first.fetched, 1);

        let second = run_extract(
            &plan,
            &first.assets,
            &cache,
            &gw,
            RetryPolicy::default(),
            4,
            &CancelToken::new(),
        )
        .await;
        assert_eq!(second.fetched, 0);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.assets.len(), 1);
    }

    #[tokio::test]
    async fn item_failure_does_not_abort_siblings() {
        let mut scripted = ScriptedContent::new(vec![
            ("/", AssetKind::Page, b"<html>home</html>"),
            ("/gone", AssetKind::Page, b"<html>gone</html>"),
        ]);
        scripted.fail_path = Some("/gone".to_string());
        let gw: Arc<dyn ContentGateway> = Arc::new(scripted);
        let cache = cache();

        let outcome = run_extract(
            &plan(),
            &[],
            &cache,
            &gw,
            RetryPolicy::default(),
            4,
            &CancelToken::new(),
        )
        .await;

        // The healthy sibling landed; the stage still carries the failure.
        assert_eq!(outcome.assets.len(), 1);
        assert!(outcome.first_error.is_some());
        assert!(!outcome.first_error.unwrap().is_retryable());
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling() {
        let gw: Arc<dyn ContentGateway> = Arc::new(ScriptedContent::new(vec![
            ("/", AssetKind::Page, b"<html>home</html>"),
        ]));
        let cache = cache();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run_extract(
            &plan(),
            &[],
            &cache,
            &gw,
            RetryPolicy::default(),
            4,
            &cancel,
        )
        .await;
        assert_eq!(outcome.fetched, 0);
        assert!(outcome.assets.is_empty());
    }
}

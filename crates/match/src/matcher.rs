use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use tessera_core::{
    AliasStore, Catalog, CatalogError, CatalogItem, EngineError, MatchCandidate, MatchReason,
};

use crate::normalize::{normalize_description, NormalizedLine};
use crate::util::similarity;

/// Confidence assigned to the winning alias for a vendor sku.
pub const ALIAS_CONFIDENCE: f32 = 1.0;
/// Competing aliases for the same vendor sku list below the winner.
pub const RUNNER_UP_ALIAS_CONFIDENCE: f32 = 0.85;
/// Exact catalog sku/barcode hits.
pub const EXACT_CONFIDENCE: f32 = 0.95;
/// Fuzzy scores scale into [0, FUZZY_SCALE], keeping every fuzzy candidate
/// strictly below the exact tier.
pub const FUZZY_SCALE: f32 = 0.89;

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Bound on each catalog call; a slow catalog degrades suggestions
    /// rather than hanging the review screen.
    pub catalog_timeout: Duration,
    /// Fuzzy hits scoring below this are noise and are dropped.
    pub min_similarity: f32,
    /// How many raw text-search hits to re-score.
    pub search_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            catalog_timeout: Duration::from_secs(5),
            min_similarity: 0.40,
            search_limit: 25,
        }
    }
}

/// Ranks internal-catalog candidates for one normalized bill line. Tiers, in
/// order: learned aliases, exact catalog code hits, fuzzy name matches.
/// Lower tiers stay in the list for operator visibility up to the caller's
/// limit.
pub struct Matcher {
    aliases: Arc<dyn AliasStore>,
    catalog: Arc<dyn Catalog>,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(
        aliases: Arc<dyn AliasStore>,
        catalog: Arc<dyn Catalog>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            aliases,
            catalog,
            config,
        }
    }

    /// Ranked candidates, best first. Alias store failures propagate; catalog
    /// failures degrade the affected tier with a warning so review can
    /// continue on aliases alone.
    pub async fn suggest(
        &self,
        line: &NormalizedLine,
        vendor_id: i64,
        limit: usize,
    ) -> Result<Vec<MatchCandidate>, EngineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<MatchCandidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if !line.sku.is_empty() {
            let aliases = self.aliases.lookup(vendor_id, &line.sku).await?;
            for (idx, alias) in aliases.iter().enumerate() {
                if !seen.insert(alias.internal_sku.clone()) {
                    continue;
                }
                let confidence = if idx == 0 {
                    ALIAS_CONFIDENCE
                } else {
                    RUNNER_UP_ALIAS_CONFIDENCE
                };
                let mut cand =
                    MatchCandidate::new(&alias.internal_sku, confidence, MatchReason::Alias);
                cand.alias_id = Some(alias.id);
                cand.alias_priority = alias.priority;
                cand.alias_last_seen = Some(alias.last_seen_at);
                cand.conversion = alias.conversion.clone();
                self.enrich(&mut cand).await;
                candidates.push(cand);
            }

            match self.find_by_code(&line.sku).await {
                Ok(Some(item)) => {
                    if seen.insert(item.sku.clone()) {
                        let mut cand =
                            MatchCandidate::new(&item.sku, EXACT_CONFIDENCE, MatchReason::Exact);
                        apply_item(&mut cand, &item);
                        candidates.push(cand);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(vendor_id, sku = %line.sku, "catalog code lookup degraded: {e}");
                }
            }
        }

        if !line.description.is_empty() {
            match self.search_by_text(&line.description).await {
                Ok(hits) => {
                    for item in hits {
                        if seen.contains(&item.sku) {
                            continue;
                        }
                        let score =
                            similarity(&line.description, &normalize_description(&item.name));
                        if score < self.config.min_similarity {
                            continue;
                        }
                        seen.insert(item.sku.clone());
                        let mut cand = MatchCandidate::new(
                            &item.sku,
                            FUZZY_SCALE * score,
                            MatchReason::Fuzzy,
                        );
                        apply_item(&mut cand, &item);
                        candidates.push(cand);
                    }
                }
                Err(e) => {
                    tracing::warn!(vendor_id, "catalog text search degraded: {e}");
                }
            }
        }

        candidates.sort_by(rank);
        candidates.truncate(limit);
        Ok(candidates)
    }

    /// Fill catalog context onto an alias candidate. Best effort; a missing
    /// or unreachable catalog entry leaves the candidate bare and posting
    /// will surface the problem if it persists.
    async fn enrich(&self, cand: &mut MatchCandidate) {
        match self.find_by_code(&cand.internal_sku).await {
            Ok(Some(item)) if item.sku == cand.internal_sku => apply_item(cand, &item),
            Ok(_) => {}
            Err(e) => tracing::debug!(sku = %cand.internal_sku, "candidate enrichment skipped: {e}"),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<CatalogItem>, CatalogError> {
        match timeout(self.config.catalog_timeout, self.catalog.find_by_code(code)).await {
            Ok(res) => res,
            Err(_) => Err(CatalogError::Unavailable(format!(
                "code lookup timed out after {:?}",
                self.config.catalog_timeout
            ))),
        }
    }

    async fn search_by_text(&self, query: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        match timeout(
            self.config.catalog_timeout,
            self.catalog.search_by_text(query, self.config.search_limit),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(CatalogError::Unavailable(format!(
                "text search timed out after {:?}",
                self.config.catalog_timeout
            ))),
        }
    }
}

fn apply_item(cand: &mut MatchCandidate, item: &CatalogItem) {
    cand.display_name = item.name.clone();
    cand.unit_cost = Some(item.avg_cost);
    cand.on_hand = Some(item.on_hand);
}

/// Deterministic candidate order: confidence, then alias priority, then
/// alias recency, then sku text.
fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.alias_priority.cmp(&a.alias_priority))
        .then_with(|| b.alias_last_seen.cmp(&a.alias_last_seen))
        .then_with(|| a.internal_sku.cmp(&b.internal_sku))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use tessera_core::{MemoryAliasStore, MemoryCatalog, Money, NewAlias};

    fn item(sku: &str, name: &str) -> CatalogItem {
        CatalogItem {
            sku: sku.to_string(),
            name: name.to_string(),
            unit: "EA".to_string(),
            barcode: None,
            vendor_ref: None,
            on_hand: Decimal::from(10),
            avg_cost: Money::from_cents(250),
        }
    }

    fn alias(vendor_id: i64, vendor_sku: &str, internal: &str, priority: i32) -> NewAlias {
        NewAlias {
            vendor_id,
            normalized_sku: vendor_sku.to_string(),
            internal_sku: internal.to_string(),
            conversion: None,
            priority,
        }
    }

    async fn matcher_with(
        aliases: Vec<NewAlias>,
        items: Vec<CatalogItem>,
    ) -> (Matcher, Arc<MemoryCatalog>) {
        let store = Arc::new(MemoryAliasStore::new());
        for a in aliases {
            store.upsert(a).await.unwrap();
        }
        let catalog = Arc::new(MemoryCatalog::new());
        for i in items {
            catalog.insert(i);
        }
        (
            Matcher::new(store, catalog.clone(), MatcherConfig::default()),
            catalog,
        )
    }

    struct DownCatalog;

    #[async_trait]
    impl Catalog for DownCatalog {
        async fn search_by_text(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<CatalogItem>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".to_string()))
        }

        async fn find_by_code(&self, _code: &str) -> Result<Option<CatalogItem>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".to_string()))
        }

        async fn apply_receiving(
            &self,
            _sku: &str,
            _qty_delta: Decimal,
            _new_avg_cost: Money,
        ) -> Result<(), CatalogError> {
            Err(CatalogError::Unavailable("connection refused".to_string()))
        }
    }

    struct StuckCatalog;

    #[async_trait]
    impl Catalog for StuckCatalog {
        async fn search_by_text(
            &self,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<CatalogItem>, CatalogError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn find_by_code(&self, _code: &str) -> Result<Option<CatalogItem>, CatalogError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn apply_receiving(
            &self,
            _sku: &str,
            _qty_delta: Decimal,
            _new_avg_cost: Money,
        ) -> Result<(), CatalogError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn alias_hit_tops_the_list() {
        let (matcher, _) = matcher_with(
            vec![alias(7, "ABC-123", "WIDGET-1", 5)],
            vec![item("WIDGET-1", "Industrial Widget")],
        )
        .await;

        let line = normalize("abc-123", "industrial widget", "2", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out[0].internal_sku, "WIDGET-1");
        assert_eq!(out[0].confidence, ALIAS_CONFIDENCE);
        assert_eq!(out[0].reason, MatchReason::Alias);
        assert_eq!(out[0].display_name, "Industrial Widget");
        assert!(out[0].alias_id.is_some());
    }

    #[tokio::test]
    async fn competing_aliases_rank_below_the_winner() {
        let (matcher, _) = matcher_with(
            vec![
                alias(7, "X-1", "NEW-SKU", 9),
                alias(7, "X-1", "OLD-SKU", 1),
            ],
            vec![],
        )
        .await;

        let line = normalize("X-1", "", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].internal_sku, "NEW-SKU");
        assert_eq!(out[0].confidence, ALIAS_CONFIDENCE);
        assert_eq!(out[1].internal_sku, "OLD-SKU");
        assert_eq!(out[1].confidence, RUNNER_UP_ALIAS_CONFIDENCE);
    }

    #[tokio::test]
    async fn exact_code_hit_without_alias() {
        let mut by_barcode = item("TONER-BK", "Toner Cartridge Black");
        by_barcode.barcode = Some("0099887".to_string());
        let (matcher, _) = matcher_with(vec![], vec![by_barcode]).await;

        let line = normalize("0099887", "toner cartridge", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out[0].internal_sku, "TONER-BK");
        assert_eq!(out[0].confidence, EXACT_CONFIDENCE);
        assert_eq!(out[0].reason, MatchReason::Exact);
    }

    #[tokio::test]
    async fn alias_absorbs_matching_exact_hit() {
        let (matcher, _) = matcher_with(
            vec![alias(7, "WIDGET-1", "WIDGET-1", 0)],
            vec![item("WIDGET-1", "Industrial Widget")],
        )
        .await;

        let line = normalize("widget-1", "", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        // one candidate, at the alias tier, not a duplicate pair
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, ALIAS_CONFIDENCE);
    }

    #[tokio::test]
    async fn fuzzy_sits_strictly_below_exact() {
        let (matcher, _) = matcher_with(
            vec![],
            vec![
                item("PAPER-A4", "Copy Paper A4 Ream"),
                item("MOTOR-OIL", "Motor Oil 5W30"),
            ],
        )
        .await;

        let line = normalize("ZZZ-9", "copy paper a4 ream", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out.len(), 1, "dissimilar items filtered: {out:?}");
        assert_eq!(out[0].internal_sku, "PAPER-A4");
        assert_eq!(out[0].reason, MatchReason::Fuzzy);
        assert!(out[0].confidence < EXACT_CONFIDENCE);
        assert!(out[0].confidence >= FUZZY_SCALE - 1e-6);
    }

    #[tokio::test]
    async fn equal_confidence_breaks_ties_by_sku() {
        let (matcher, _) = matcher_with(
            vec![],
            vec![
                item("B-TAPE", "Packing Tape Clear"),
                item("A-TAPE", "Packing Tape Clear"),
            ],
        )
        .await;

        let line = normalize("", "packing tape clear", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, out[1].confidence);
        assert_eq!(out[0].internal_sku, "A-TAPE");
        assert_eq!(out[1].internal_sku, "B-TAPE");
    }

    #[tokio::test]
    async fn down_catalog_degrades_to_alias_tier() {
        let store = Arc::new(MemoryAliasStore::new());
        store.upsert(alias(7, "ABC", "WIDGET-1", 0)).await.unwrap();
        let matcher = Matcher::new(store, Arc::new(DownCatalog), MatcherConfig::default());

        let line = normalize("abc", "industrial widget", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].internal_sku, "WIDGET-1");
        // enrichment was impossible, the sku stands in for the name
        assert_eq!(out[0].display_name, "WIDGET-1");
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_catalog_hits_the_timeout() {
        let store = Arc::new(MemoryAliasStore::new());
        store.upsert(alias(7, "ABC", "WIDGET-1", 0)).await.unwrap();
        let matcher = Matcher::new(
            store,
            Arc::new(StuckCatalog),
            MatcherConfig {
                catalog_timeout: Duration::from_millis(50),
                ..MatcherConfig::default()
            },
        );

        let line = normalize("abc", "widget", "1", None);
        let out = matcher.suggest(&line, 7, 5).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].internal_sku, "WIDGET-1");
    }

    #[tokio::test]
    async fn limit_truncates_after_ranking() {
        let (matcher, _) = matcher_with(
            vec![
                alias(7, "M-1", "AAA", 3),
                alias(7, "M-1", "BBB", 2),
                alias(7, "M-1", "CCC", 1),
            ],
            vec![],
        )
        .await;

        let line = normalize("M-1", "", "1", None);
        let out = matcher.suggest(&line, 7, 2).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].internal_sku, "AAA");

        let none = matcher.suggest(&line, 7, 0).await.unwrap();
        assert!(none.is_empty());
    }
}

use once_cell::sync::Lazy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use toolroute_core::{CacheError, CacheSettings, RoutingDecision, ToolRequest};
use tracing::{debug, trace};

static INSTANT_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// 未提供调用方时缓存键中的占位
const ANONYMOUS_CALLER: &str = "-";

fn now_nanos() -> u64 {
    Instant::now().duration_since(*INSTANT_EPOCH).as_nanos() as u64
}

/// 缓存条目
#[derive(Debug)]
struct CacheEntry {
    decision: RoutingDecision,
    created_at: Instant,
    hit_count: AtomicU64,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(decision: RoutingDecision) -> Self {
        Self {
            decision,
            created_at: Instant::now(),
            hit_count: AtomicU64::new(0),
            last_access: AtomicU64::new(now_nanos()),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }

    fn touch(&self) {
        self.last_access.store(now_nanos(), Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// 路由决策缓存
///
/// 有界 LRU + TTL。键由工具、调用方（可选）和参数的规范化哈希组成。
/// 缓存只是优化：关闭后路由结果必须完全一致。
pub struct RoutingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    scope_by_caller: bool,
    // 统计信息
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Default for RoutingCache {
    fn default() -> Self {
        Self::new(&CacheSettings::default())
    }
}

impl RoutingCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            enabled: settings.enabled,
            ttl: settings.ttl(),
            max_entries: settings.max_entries,
            scope_by_caller: settings.scope_by_caller,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 生成缓存键：`tool:caller:sha256(规范化参数)`
    pub fn key_for(&self, request: &ToolRequest) -> Result<String, CacheError> {
        let canonical = request.canonical_arguments()?;
        let digest = Sha256::digest(canonical.as_bytes());

        let caller = if self.scope_by_caller {
            request
                .metadata
                .caller_id
                .as_deref()
                .unwrap_or(ANONYMOUS_CALLER)
        } else {
            ANONYMOUS_CALLER
        };

        Ok(format!("{}:{}:{:x}", request.tool, caller, digest))
    }

    /// 查找未过期且专家仍可用的决策
    pub async fn get<F>(&self, key: &str, expert_available: F) -> Option<RoutingDecision>
    where
        F: Fn(&str) -> bool,
    {
        if !self.enabled {
            return None;
        }

        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(self.ttl) {
                debug!("Cache entry expired for key '{}'", key);
            } else if !expert_available(&entry.decision.expert_id) {
                debug!(
                    "Cached expert '{}' no longer available for key '{}'",
                    entry.decision.expert_id, key
                );
            } else {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Cache hit for key '{}', hit_count: {}",
                    key,
                    entry.hit_count.load(Ordering::Relaxed)
                );
                return Some(entry.decision.clone());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("Cache miss for key '{}'", key);
        None
    }

    pub async fn put(&self, key: String, decision: RoutingDecision) {
        self.put_if(key, decision, |_| true).await;
    }

    /// 持有写锁时确认专家仍可用再写入，返回是否写入
    ///
    /// 健康状态翻转后的清理同样需要写锁，所以清理之后不会再写入过期决策。
    pub async fn put_if<F>(
        &self,
        key: String,
        decision: RoutingDecision,
        expert_available: F,
    ) -> bool
    where
        F: Fn(&str) -> bool,
    {
        if !self.enabled {
            return false;
        }

        let mut entries = self.entries.write().await;

        if !expert_available(&decision.expert_id) {
            debug!(
                "Skipped caching decision for key '{}': expert '{}' no longer available",
                key, decision.expert_id
            );
            return false;
        }

        self.cleanup_expired_entries(&mut entries);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            self.evict_lru_entry(&mut entries);
        }

        debug!(
            "Cached routing decision for key '{}' -> {}",
            key, decision.expert_id
        );
        entries.insert(key, CacheEntry::new(decision));
        true
    }

    fn cleanup_expired_entries(&self, entries: &mut HashMap<String, CacheEntry>) {
        let ttl = self.ttl;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Removed {} expired cache entries", removed);
        }
    }

    /// 驱逐最近最少访问的条目
    fn evict_lru_entry(&self, entries: &mut HashMap<String, CacheEntry>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone());

        if let Some(key) = lru_key {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted LRU cache entry: {}", key);
        }
    }

    /// 按 glob 模式批量失效，例如 `search:*` 或 `*:alice:*`
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !matcher.matches(key));
        let removed = before - entries.len();
        self.record_invalidations(removed, pattern);
        Ok(removed)
    }

    /// 清除所有指向该专家的决策
    pub async fn invalidate_expert(&self, expert_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.decision.expert_id != expert_id);
        let removed = before - entries.len();
        self.record_invalidations(removed, expert_id);
        removed
    }

    fn record_invalidations(&self, removed: usize, target: &str) {
        if removed > 0 {
            self.invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} cache entries for '{}'", removed, target);
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        debug!("Cache cleared");
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            total_requests: total,
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache Stats: {} requests, {} hits ({:.1}%), {} misses, {} evictions, {} invalidations",
            self.total_requests,
            self.cache_hits,
            self.hit_rate,
            self.cache_misses,
            self.evictions,
            self.invalidations
        )
    }
}

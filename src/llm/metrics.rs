//! Process-wide prompt-cache metrics.
//!
//! OpenAI reports cached prompt tokens per call; this counter aggregates them
//! under a mutex so concurrent requests can record safely.

use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total_requests: u64,
    cache_hit_requests: u64,
    total_prompt_tokens: u64,
    total_cached_tokens: u64,
}

static COUNTERS: Mutex<Counters> = Mutex::new(Counters {
    total_requests: 0,
    cache_hit_requests: 0,
    total_prompt_tokens: 0,
    total_cached_tokens: 0,
});

/// Record usage from one completed call.
pub fn record_usage(prompt_tokens: u64, cached_tokens: u64) {
    let snapshot = {
        let mut c = COUNTERS.lock().unwrap();
        c.total_requests += 1;
        c.total_prompt_tokens += prompt_tokens;
        if cached_tokens > 0 {
            c.cache_hit_requests += 1;
            c.total_cached_tokens += cached_tokens;
        }
        *c
    };

    let cache_ratio = if prompt_tokens > 0 {
        cached_tokens as f64 / prompt_tokens as f64 * 100.0
    } else {
        0.0
    };
    tracing::info!(
        "Cache metrics - request #{}: promptTokens={}, cachedTokens={}, cacheRatio={:.1}%, cumulative: totalRequests={}, cacheHitRate={:.1}%, tokenCacheRate={:.1}%",
        snapshot.total_requests,
        prompt_tokens,
        cached_tokens,
        cache_ratio,
        snapshot.total_requests,
        rate(snapshot.cache_hit_requests, snapshot.total_requests),
        rate(snapshot.total_cached_tokens, snapshot.total_prompt_tokens),
    );
}

/// Percentage of requests that hit the prompt cache.
pub fn cache_hit_rate() -> f64 {
    let c = COUNTERS.lock().unwrap();
    rate(c.cache_hit_requests, c.total_requests)
}

/// Percentage of prompt tokens served from cache.
pub fn token_cache_rate() -> f64 {
    let c = COUNTERS.lock().unwrap();
    rate(c.total_cached_tokens, c.total_prompt_tokens)
}

fn rate(num: u64, denom: u64) -> f64 {
    if denom > 0 {
        num as f64 / denom as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_rates() {
        record_usage(1000, 400);
        record_usage(1000, 0);
        // Rates are cumulative and process-wide; only sanity-check bounds.
        let hit = cache_hit_rate();
        let token = token_cache_rate();
        assert!((0.0..=100.0).contains(&hit));
        assert!((0.0..=100.0).contains(&token));
    }
}

// ================= 极简令牌桶 =================
// 每个 worker 各持一个，用来限制热路径上的告警日志频率

use std::time::Instant;

pub struct TokenBucket {
    tokens: f64,   // 当前余额
    rate: f64,     // 每秒补充
    capacity: f64, // 突发上限
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            tokens: burst, // 初始给满
            rate: rate_per_sec,
            capacity: burst,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        if elapsed > 0.0001 {
            self.tokens = (self.tokens + self.rate * elapsed).min(self.capacity);
            self.last_update = now;
        }
    }

    pub fn try_take_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn try_take(&mut self) -> bool {
        self.try_take_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_then_refill() {
        let mut bucket = TokenBucket::new(10.0, 3.0);
        let t0 = bucket.last_update;
        assert!(bucket.try_take_at(t0));
        assert!(bucket.try_take_at(t0));
        assert!(bucket.try_take_at(t0));
        assert!(!bucket.try_take_at(t0));

        // 150ms 补 1.5 个
        let t1 = t0 + Duration::from_millis(150);
        assert!(bucket.try_take_at(t1));
        assert!(!bucket.try_take_at(t1));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut bucket = TokenBucket::new(1000.0, 2.0);
        let later = bucket.last_update + Duration::from_secs(60);
        assert!(bucket.try_take_at(later));
        assert!(bucket.try_take_at(later));
        assert!(!bucket.try_take_at(later));
    }

    #[test]
    fn zero_rate_disables_logging() {
        let mut bucket = TokenBucket::new(0.0, 0.0);
        assert!(!bucket.try_take());
    }
}

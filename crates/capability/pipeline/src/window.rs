use std::collections::VecDeque;

pub const WINDOW_CAPACITY: usize = 10;

/// 最近若干次转发结果，超出容量时淘汰最旧的。
#[derive(Debug, Clone)]
pub struct SuccessWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl Default for SuccessWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

impl SuccessWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 失败次数 / 记录数；没有记录时为 0。
    pub fn failure_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|success| !**success).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};

/// A held position is swappable while it trades strictly between its stop and first target.
pub fn is_swap_candidate(current_price: Decimal, stop_price: Decimal, first_target: Decimal) -> bool {
    stop_price < current_price && current_price < first_target
}

/// Swap candidates for one batch. Each is handed out at most once, and
/// symbols freed by a swap are remembered so they are not bought back.
#[derive(Debug, Default)]
pub struct SwapQueue {
    candidates: VecDeque<String>,
    swapped_out: HashSet<String>,
}

impl SwapQueue {
    pub fn new(candidates: impl IntoIterator<Item = String>) -> Self {
        Self { candidates: candidates.into_iter().collect(), swapped_out: HashSet::new() }
    }

    pub fn take(&mut self) -> Option<String> {
        self.candidates.pop_front()
    }

    pub fn mark_swapped(&mut self, symbol: &str) {
        self.swapped_out.insert(symbol.to_string());
    }

    pub fn was_swapped(&self, symbol: &str) -> bool {
        self.swapped_out.contains(symbol)
    }

    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }
}

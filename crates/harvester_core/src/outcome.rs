/// Count reported for [`HarvestOutcome::NoWork`].
pub const NO_WORK: i64 = -1;

/// Result of one `harvest()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Messages retrieved; 0 when the call only gathered new queries.
    Harvested(usize),
    /// Nothing useful happened; ends the current harvest round.
    NoWork,
}

impl HarvestOutcome {
    pub fn count(self) -> i64 {
        match self {
            HarvestOutcome::Harvested(count) => count as i64,
            HarvestOutcome::NoWork => NO_WORK,
        }
    }

    pub fn is_no_work(self) -> bool {
        matches!(self, HarvestOutcome::NoWork)
    }

    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            HarvestOutcome::NoWork
        } else {
            HarvestOutcome::Harvested(count)
        }
    }
}

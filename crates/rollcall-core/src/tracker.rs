//! Temporal consistency: turn noisy per-frame names into a stable
//! confirmed-present set.

use crate::matcher::MatchOutcome;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// How a frame with several matches of the same name is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TallyPolicy {
    /// Every matching detection adds one, so a name seen twice in a frame
    /// (reflection, photo of a photo) counts twice.
    #[default]
    PerDetection,
    /// A name adds at most one per frame.
    PerFrame,
}

impl std::str::FromStr for TallyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-detection" => Ok(TallyPolicy::PerDetection),
            "per-frame" => Ok(TallyPolicy::PerFrame),
            other => Err(format!("unknown tally policy '{other}' (expected per-detection or per-frame)")),
        }
    }
}

/// Session-scoped vote counter. Create one per live session.
///
/// Unknown faces are never counted, so they can never be confirmed. A name
/// that reaches `min_frames` is confirmed and stays confirmed.
#[derive(Debug, Clone)]
pub struct ConsistencyTracker {
    min_frames: u32,
    policy: TallyPolicy,
    counts: HashMap<String, u32>,
    confirmed: Vec<String>,
    confirmed_set: HashSet<String>,
}

impl ConsistencyTracker {
    pub fn new(min_frames: u32, policy: TallyPolicy) -> Self {
        Self {
            min_frames,
            policy,
            counts: HashMap::new(),
            confirmed: Vec::new(),
            confirmed_set: HashSet::new(),
        }
    }

    /// Record one frame's outcomes. Returns names confirmed by this frame.
    pub fn observe<'a, I>(&mut self, outcomes: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a MatchOutcome>,
    {
        let mut seen_this_frame: HashSet<&str> = HashSet::new();
        for name in outcomes.into_iter().filter_map(MatchOutcome::name) {
            if self.policy == TallyPolicy::PerFrame && !seen_this_frame.insert(name) {
                continue;
            }
            *self.counts.entry(name.to_string()).or_insert(0) += 1;
        }

        let mut newly = Vec::new();
        for (name, &count) in &self.counts {
            if count >= self.min_frames && !self.confirmed_set.contains(name) {
                newly.push(name.clone());
            }
        }
        newly.sort();
        for name in &newly {
            tracing::info!(name = %name, count = self.counts[name], "confirmed present");
            self.confirmed_set.insert(name.clone());
            self.confirmed.push(name.clone());
        }
        newly
    }

    pub fn count(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn is_confirmed(&self, name: &str) -> bool {
        self.confirmed_set.contains(name)
    }

    /// Confirmed names in the order they were confirmed.
    pub fn confirmed(&self) -> &[String] {
        &self.confirmed
    }

    pub fn min_frames(&self) -> u32 {
        self.min_frames
    }
}

#![forbid(unsafe_code)]

//! Rank ladder: the ordered rank configuration and point-based resolution.
//!
//! The canonical sequence is the configured order of ranks. Category ranks
//! group leaves for display and are never assigned. Manual-only leaves are
//! capstones: assignable by an administrator, never by resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_RANK_NAME_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankKind {
    #[default]
    Leaf,
    Category,
}

impl RankKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RankKind::Leaf => "leaf",
            RankKind::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "leaf" => Some(RankKind::Leaf),
            "category" => Some(RankKind::Category),
            _ => None,
        }
    }
}

/// One entry of the ladder configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankSpec {
    pub name: String,
    #[serde(default)]
    pub threshold_points: i64,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub kind: RankKind,
    #[serde(default)]
    pub manual_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderConfig {
    pub ranks: Vec<RankSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rank {
    pub name: String,
    pub threshold_points: i64,
    pub parent: Option<String>,
    pub kind: RankKind,
    pub manual_only: bool,
    pub sequence: usize,
}

impl Rank {
    /// Leaf ranks are the only ones a member may hold.
    pub fn is_assignable(&self) -> bool {
        self.kind == RankKind::Leaf
    }

    pub fn is_auto_assignable(&self) -> bool {
        self.is_assignable() && !self.manual_only
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LadderError {
    #[error("rank ladder has no ranks")]
    Empty,
    #[error("invalid rank name {name:?}")]
    InvalidName { name: String },
    #[error("duplicate rank name {name:?}")]
    DuplicateName { name: String },
    #[error("rank {name:?} has negative threshold")]
    NegativeThreshold { name: String },
    #[error("rank {name:?} references unknown parent {parent:?}")]
    UnknownParent { name: String, parent: String },
    #[error("rank {name:?} has parent {parent:?} which is not a category")]
    ParentNotCategory { name: String, parent: String },
    #[error("rank {name:?} is part of a parent cycle")]
    ParentCycle { name: String },
    #[error("rank {name:?} has a lower threshold than an earlier rank")]
    ThresholdOutOfOrder { name: String },
    #[error("ladder config parse failed: {message}")]
    Parse { message: String },
}

/// Immutable, validated rank ladder. Built once and shared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankLadder {
    ranks: Vec<Rank>,
    index: BTreeMap<String, usize>,
    // Positions of auto-assignable ranks sorted by (threshold, sequence).
    auto_order: Vec<usize>,
}

impl RankLadder {
    pub fn try_new(specs: Vec<RankSpec>) -> Result<Self, LadderError> {
        if specs.is_empty() {
            return Err(LadderError::Empty);
        }

        let mut index = BTreeMap::new();
        let mut ranks = Vec::with_capacity(specs.len());
        for (sequence, spec) in specs.into_iter().enumerate() {
            let name = normalize_rank_name(&spec.name)?;
            if spec.threshold_points < 0 {
                return Err(LadderError::NegativeThreshold { name });
            }
            if index.insert(name.clone(), sequence).is_some() {
                return Err(LadderError::DuplicateName { name });
            }
            let parent = spec
                .parent
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            ranks.push(Rank {
                name,
                threshold_points: spec.threshold_points,
                parent,
                kind: spec.kind,
                manual_only: spec.manual_only && spec.kind == RankKind::Leaf,
                sequence,
            });
        }

        for rank in &ranks {
            let Some(parent) = rank.parent.as_deref() else {
                continue;
            };
            let Some(&parent_pos) = index.get(parent) else {
                return Err(LadderError::UnknownParent {
                    name: rank.name.clone(),
                    parent: parent.to_string(),
                });
            };
            if ranks[parent_pos].kind != RankKind::Category {
                return Err(LadderError::ParentNotCategory {
                    name: rank.name.clone(),
                    parent: parent.to_string(),
                });
            }
        }
        ensure_acyclic(&ranks, &index)?;

        let mut last_threshold = 0i64;
        for rank in ranks.iter().filter(|rank| rank.is_auto_assignable()) {
            if rank.threshold_points < last_threshold {
                return Err(LadderError::ThresholdOutOfOrder {
                    name: rank.name.clone(),
                });
            }
            last_threshold = rank.threshold_points;
        }

        let mut auto_order: Vec<usize> = ranks
            .iter()
            .filter(|rank| rank.is_auto_assignable())
            .map(|rank| rank.sequence)
            .collect();
        auto_order.sort_by_key(|&pos| (ranks[pos].threshold_points, pos));

        Ok(Self {
            ranks,
            index,
            auto_order,
        })
    }

    pub fn from_config(config: LadderConfig) -> Result<Self, LadderError> {
        Self::try_new(config.ranks)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, LadderError> {
        let config: LadderConfig = serde_yaml::from_str(raw).map_err(|err| LadderError::Parse {
            message: err.to_string(),
        })?;
        Self::from_config(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, LadderError> {
        let config: LadderConfig = serde_json::from_str(raw).map_err(|err| LadderError::Parse {
            message: err.to_string(),
        })?;
        Self::from_config(config)
    }

    pub fn to_config(&self) -> LadderConfig {
        LadderConfig {
            ranks: self
                .ranks
                .iter()
                .map(|rank| RankSpec {
                    name: rank.name.clone(),
                    threshold_points: rank.threshold_points,
                    parent: rank.parent.clone(),
                    kind: rank.kind,
                    manual_only: rank.manual_only,
                })
                .collect(),
        }
    }

    /// All ranks in canonical sequence, categories included.
    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    pub fn get(&self, name: &str) -> Option<&Rank> {
        self.position(name).map(|pos| &self.ranks[pos])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Leaf ranks in canonical sequence, manual-only capstones included.
    pub fn assignable(&self) -> impl Iterator<Item = &Rank> + '_ {
        self.ranks.iter().filter(|rank| rank.is_assignable())
    }

    /// The auto-assignable rank with the greatest threshold `<= points`.
    /// Equal thresholds resolve to the rank later in canonical sequence.
    pub fn resolve(&self, points: i64) -> Option<&Rank> {
        let upto = self
            .auto_order
            .partition_point(|&pos| self.ranks[pos].threshold_points <= points);
        upto.checked_sub(1)
            .map(|last| &self.ranks[self.auto_order[last]])
    }

    /// Resolution that honors a manually granted capstone: a member holding a
    /// manual-only rank keeps it while still at or above its threshold.
    pub fn reresolve(&self, points: i64, current: Option<&str>) -> Option<&Rank> {
        if let Some(rank) = current.and_then(|name| self.get(name)) {
            if rank.manual_only && rank.is_assignable() && points >= rank.threshold_points {
                return Some(rank);
            }
        }
        self.resolve(points)
    }

    /// The next auto-assignable rank after `current` in canonical sequence.
    /// With no current rank this is the first auto-assignable rank.
    pub fn next_rank(&self, current: Option<&str>) -> Option<&Rank> {
        let start = match current {
            Some(name) => self.position(name)? + 1,
            None => 0,
        };
        self.ranks
            .get(start..)?
            .iter()
            .find(|rank| rank.is_auto_assignable())
    }

    pub fn points_to_next(&self, points: i64, current: Option<&str>) -> Option<i64> {
        self.next_rank(current)
            .map(|rank| rank.threshold_points.saturating_sub(points).max(0))
    }
}

fn normalize_rank_name(raw: &str) -> Result<String, LadderError> {
    let name = raw.trim();
    if name.is_empty()
        || name.len() > MAX_RANK_NAME_LEN
        || name.chars().any(|ch| ch.is_control())
    {
        return Err(LadderError::InvalidName {
            name: raw.to_string(),
        });
    }
    Ok(name.to_string())
}

fn ensure_acyclic(ranks: &[Rank], index: &BTreeMap<String, usize>) -> Result<(), LadderError> {
    for rank in ranks {
        let mut current = rank.parent.as_deref();
        let mut hops = 0usize;
        while let Some(parent) = current {
            hops += 1;
            if parent == rank.name || hops > ranks.len() {
                return Err(LadderError::ParentCycle {
                    name: rank.name.clone(),
                });
            }
            current = index
                .get(parent)
                .and_then(|&pos| ranks[pos].parent.as_deref());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;

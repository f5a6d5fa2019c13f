use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::domain::{PeerGroupKey, UnitId};

#[derive(Debug, Clone, PartialEq)]
pub struct RankInput {
    pub unit_id: UnitId,
    pub overall: f64,
    pub completeness: f64,
    pub peer_group: PeerGroupKey,
}

/// National and peer-group ranks for one period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    /// Units in final order, best first.
    pub order: Vec<UnitId>,
    pub national: BTreeMap<UnitId, u32>,
    pub peer: BTreeMap<UnitId, u32>,
}

/// Higher overall first, then higher completeness, then unit identifier.
pub fn ranking_order(a: &RankInput, b: &RankInput) -> Ordering {
    b.overall
        .total_cmp(&a.overall)
        .then_with(|| b.completeness.total_cmp(&a.completeness))
        .then_with(|| a.unit_id.cmp(&b.unit_id))
}

fn tied(a: &RankInput, b: &RankInput) -> bool {
    a.overall == b.overall && a.completeness == b.completeness
}

/// Standard competition ranks ("1224") over an already ordered slice.
fn competition_ranks(ordered: &[&RankInput]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(ordered.len());
    for (position, entry) in ordered.iter().enumerate() {
        let rank = match position.checked_sub(1) {
            Some(previous) if tied(ordered[previous], entry) => ranks[previous],
            _ => position as u32 + 1,
        };
        ranks.push(rank);
    }
    ranks
}

pub fn rank(inputs: &[RankInput]) -> Ranking {
    let mut ordered: Vec<&RankInput> = inputs.iter().collect();
    ordered.sort_by(|a, b| ranking_order(a, b));

    let national = ordered
        .iter()
        .zip(competition_ranks(&ordered))
        .map(|(entry, rank)| (entry.unit_id.clone(), rank))
        .collect();

    let mut groups: BTreeMap<&PeerGroupKey, Vec<&RankInput>> = BTreeMap::new();
    for entry in &ordered {
        groups.entry(&entry.peer_group).or_default().push(entry);
    }
    let peer = groups
        .values()
        .flat_map(|members| {
            members
                .iter()
                .zip(competition_ranks(members))
                .map(|(entry, rank)| (entry.unit_id.clone(), rank))
                .collect::<Vec<_>>()
        })
        .collect();

    Ranking {
        order: ordered.iter().map(|entry| entry.unit_id.clone()).collect(),
        national,
        peer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> PeerGroupKey {
        PeerGroupKey {
            unit_type: Some(name.to_string()),
            region: None,
            population_band: None,
        }
    }

    fn input(id: &str, overall: f64, completeness: f64, peer: &str) -> RankInput {
        RankInput {
            unit_id: UnitId::new(id),
            overall,
            completeness,
            peer_group: group(peer),
        }
    }

    #[test]
    fn completeness_breaks_score_ties() {
        let ranking = rank(&[
            input("a", 72.0, 80.0, "city"),
            input("b", 72.0, 90.0, "city"),
        ]);

        assert_eq!(ranking.national[&UnitId::new("b")], 1);
        assert_eq!(ranking.national[&UnitId::new("a")], 2);
        assert_eq!(ranking.order, vec![UnitId::new("b"), UnitId::new("a")]);
    }

    #[test]
    fn full_ties_share_rank_and_skip_following_positions() {
        let ranking = rank(&[
            input("c", 60.0, 100.0, "city"),
            input("a", 80.0, 100.0, "city"),
            input("b", 60.0, 100.0, "village"),
            input("d", 40.0, 100.0, "village"),
        ]);

        assert_eq!(ranking.national[&UnitId::new("a")], 1);
        assert_eq!(ranking.national[&UnitId::new("b")], 2);
        assert_eq!(ranking.national[&UnitId::new("c")], 2);
        assert_eq!(ranking.national[&UnitId::new("d")], 4);
        assert_eq!(
            ranking.order,
            vec![
                UnitId::new("a"),
                UnitId::new("b"),
                UnitId::new("c"),
                UnitId::new("d")
            ],
            "identifier decides order within a tie"
        );
    }

    #[test]
    fn peer_ranks_are_computed_within_each_group() {
        let ranking = rank(&[
            input("a", 80.0, 100.0, "city"),
            input("b", 70.0, 100.0, "village"),
            input("c", 60.0, 100.0, "city"),
            input("d", 50.0, 100.0, "village"),
        ]);

        assert_eq!(ranking.peer[&UnitId::new("a")], 1);
        assert_eq!(ranking.peer[&UnitId::new("c")], 2);
        assert_eq!(ranking.peer[&UnitId::new("b")], 1);
        assert_eq!(ranking.peer[&UnitId::new("d")], 2);
    }

    #[test]
    fn input_order_does_not_change_the_ranking() {
        let mut inputs = vec![
            input("a", 55.0, 70.0, "city"),
            input("b", 55.0, 70.0, "city"),
            input("c", 90.0, 40.0, "city"),
        ];
        let first = rank(&inputs);
        inputs.reverse();
        assert_eq!(rank(&inputs), first);
    }
}

// Global rebalancing pass: equalizes team sizes after bucket-wise placement.
//
// Round-robin placement balances each interest bucket on its own, but every
// bucket starts at the first team, so totals drift apart and the leftover
// players pile up on the leading teams. This pass draws random per-team
// targets and moves single players from over-target to under-target teams
// until every team sits on its target, which leaves `max - min <= 1` with the
// extra players on randomly chosen teams.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::hash::Hash;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Difference between the largest and smallest count. Zero for no teams.
pub fn spread(counts: &[usize]) -> usize {
    match (counts.iter().max(), counts.iter().min()) {
        (Some(max), Some(min)) => max - min,
        _ => 0,
    }
}

/// Per-team target sizes for `total` players over `team_count` teams.
///
/// Every team gets `total / team_count`; the `total % team_count` teams that
/// receive one extra are chosen uniformly at random.
pub fn assign_targets<R: Rng + ?Sized>(total: usize, team_count: usize, rng: &mut R) -> Vec<usize> {
    if team_count == 0 {
        return Vec::new();
    }
    let base = total / team_count;
    let remainder = total % team_count;

    let mut order: Vec<usize> = (0..team_count).collect();
    order.shuffle(rng);

    let mut targets = vec![base; team_count];
    for &idx in order.iter().take(remainder) {
        targets[idx] += 1;
    }
    targets
}

/// Bring every roster to its random target size. Returns the number of moves.
///
/// Targets come from [`assign_targets`], so even rosters that are already
/// within one of each other may move a player when the teams holding the
/// extra players differ from the drawn ones. Rosters of equal size with no
/// remainder are left untouched. Players move one at a time from the team
/// with the largest surplus to the team with the largest deficit. The player moved is the one
/// whose bucket (per `bucket_of`) is most over-represented on the donor
/// relative to the receiver, preferring members nearer the end of the donor
/// list on ties. Interest balance is best-effort; size balance is guaranteed.
pub fn rebalance<T, K, F, R>(rosters: &mut [Vec<T>], bucket_of: F, rng: &mut R) -> usize
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    R: Rng + ?Sized,
{
    let counts: Vec<usize> = rosters.iter().map(Vec::len).collect();
    let total: usize = counts.iter().sum();
    let targets = assign_targets(total, rosters.len(), rng);
    debug!(
        "rebalancing counts {:?} (spread {}) to targets {:?}",
        counts,
        spread(&counts),
        targets
    );

    let mut moves = 0;
    loop {
        let donor = most_over(rosters, &targets);
        let receiver = most_under(rosters, &targets);
        let (Some(donor), Some(receiver)) = (donor, receiver) else {
            break;
        };

        let idx = pick_member(&rosters[donor], &rosters[receiver], &bucket_of);
        let player = rosters[donor].remove(idx);
        rosters[receiver].push(player);
        moves += 1;
    }

    debug!("rebalancing finished after {} moves", moves);
    moves
}

/// Index of the roster furthest above its target, if any is above.
fn most_over<T>(rosters: &[Vec<T>], targets: &[usize]) -> Option<usize> {
    (0..rosters.len())
        .filter(|&i| rosters[i].len() > targets[i])
        .max_by_key(|&i| (rosters[i].len() - targets[i], Reverse(i)))
}

/// Index of the roster furthest below its target, if any is below.
fn most_under<T>(rosters: &[Vec<T>], targets: &[usize]) -> Option<usize> {
    (0..rosters.len())
        .filter(|&i| rosters[i].len() < targets[i])
        .max_by_key(|&i| (targets[i] - rosters[i].len(), Reverse(i)))
}

fn pick_member<T, K, F>(donor: &[T], receiver: &[T], bucket_of: &F) -> usize
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut donor_counts: HashMap<K, i64> = HashMap::new();
    for member in donor {
        *donor_counts.entry(bucket_of(member)).or_insert(0) += 1;
    }
    let mut receiver_counts: HashMap<K, i64> = HashMap::new();
    for member in receiver {
        *receiver_counts.entry(bucket_of(member)).or_insert(0) += 1;
    }

    let mut best_idx = donor.len().saturating_sub(1);
    let mut best_gap = i64::MIN;
    for (idx, member) in donor.iter().enumerate().rev() {
        let bucket = bucket_of(member);
        let gap = donor_counts.get(&bucket).copied().unwrap_or(0)
            - receiver_counts.get(&bucket).copied().unwrap_or(0);
        if gap > best_gap {
            best_gap = gap;
            best_idx = idx;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn counts<T>(rosters: &[Vec<T>]) -> Vec<usize> {
        rosters.iter().map(Vec::len).collect()
    }

    #[test]
    fn spread_of_counts() {
        assert_eq!(spread(&[]), 0);
        assert_eq!(spread(&[3]), 0);
        assert_eq!(spread(&[3, 1, 2]), 2);
    }

    #[test]
    fn targets_sum_to_total_and_differ_by_at_most_one() {
        let mut rng = StdRng::seed_from_u64(11);
        for total in 0..30 {
            for teams in 1..8 {
                let targets = assign_targets(total, teams, &mut rng);
                assert_eq!(targets.len(), teams);
                assert_eq!(targets.iter().sum::<usize>(), total);
                assert!(spread(&targets) <= 1);
            }
        }
    }

    #[test]
    fn targets_for_zero_teams_is_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(assign_targets(5, 0, &mut rng).is_empty());
    }

    #[test]
    fn equal_rosters_are_not_touched() {
        let mut rosters = vec![vec![1, 2], vec![3, 6], vec![4, 5]];
        let before = rosters.clone();
        let moves = rebalance(&mut rosters, |_| 0u8, &mut StdRng::seed_from_u64(3));
        assert_eq!(moves, 0);
        assert_eq!(rosters, before);
    }

    #[test]
    fn near_balanced_rosters_move_at_most_the_remainder() {
        for seed in 0..50 {
            let mut rosters = vec![vec![1, 2], vec![3], vec![4, 5]];
            let moves = rebalance(&mut rosters, |_| 0u8, &mut StdRng::seed_from_u64(seed));
            let c = counts(&rosters);
            assert!(moves <= 2, "seed {seed}: {moves} moves");
            assert!(spread(&c) <= 1, "seed {seed}: counts {c:?}");
            assert_eq!(c.iter().sum::<usize>(), 5);
        }
    }

    #[test]
    fn extra_player_lands_on_every_team_across_seeds() {
        let mut extra_per_team = [0usize; 4];
        for seed in 0..400 {
            // Dealing five players from the first team leaves it one ahead.
            let mut rosters = vec![vec![1, 5], vec![2], vec![3], vec![4]];
            rebalance(&mut rosters, |_| 0u8, &mut StdRng::seed_from_u64(seed));
            let c = counts(&rosters);
            let team = c.iter().position(|&n| n == 2).unwrap();
            extra_per_team[team] += 1;
        }
        assert!(
            extra_per_team.iter().all(|&n| n >= 50),
            "extra player distribution {extra_per_team:?}"
        );
    }

    #[test]
    fn lopsided_rosters_are_evened_out() {
        let mut rosters = vec![vec![1, 2, 3, 4, 5, 6, 7], vec![], vec![8]];
        let moves = rebalance(&mut rosters, |_| 0u8, &mut StdRng::seed_from_u64(5));
        let c = counts(&rosters);
        assert!(spread(&c) <= 1, "counts {c:?}");
        assert_eq!(c.iter().sum::<usize>(), 8);
        assert!(moves >= 4);
    }

    #[test]
    fn every_player_survives_rebalancing() {
        let mut rosters = vec![(0..10).collect::<Vec<u32>>(), vec![10], vec![], vec![11, 12]];
        rebalance(&mut rosters, |p| p % 3, &mut StdRng::seed_from_u64(9));
        let mut all: Vec<u32> = rosters.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..13).collect::<Vec<u32>>());
    }

    #[test]
    fn moves_prefer_over_represented_bucket() {
        // Donor holds one "a" and three "b"; receiver already has an "a".
        // The first move should hand over a "b".
        let donor = vec!["a", "b", "b", "b"];
        let receiver = vec!["a"];
        let idx = pick_member(&donor, &receiver, &|s: &&str| *s);
        assert_eq!(donor[idx], "b");
        assert_eq!(idx, 3);
    }

    #[test]
    fn pick_member_falls_back_to_last() {
        let donor = vec![1, 1, 1];
        let receiver: Vec<i32> = vec![];
        assert_eq!(pick_member(&donor, &receiver, &|_: &i32| ()), 2);
    }
}

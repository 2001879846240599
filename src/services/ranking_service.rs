use crate::models::result::StudentResult;
use crate::services::aggregation_service::RATE_SCALE;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub struct RankingService;

impl RankingService {
    /// Rank of each net: 1 + number of nets strictly greater. Ties share a rank.
    pub fn ranks(nets: &[Decimal]) -> Vec<u32> {
        let sorted = Self::sorted_desc(nets);
        nets.iter()
            .map(|net| sorted.partition_point(|other| other > net) as u32 + 1)
            .collect()
    }

    /// Share of the population with a strictly lower net, in percent.
    pub fn percentile(strictly_lower: usize, population: usize) -> Decimal {
        if population == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(strictly_lower as u64) * Decimal::ONE_HUNDRED / Decimal::from(population as u64))
            .round_dp(RATE_SCALE)
    }

    pub fn percentiles(nets: &[Decimal]) -> Vec<Decimal> {
        let sorted = Self::sorted_desc(nets);
        nets.iter()
            .map(|net| {
                let at_least = sorted.partition_point(|other| other >= net);
                Self::percentile(sorted.len() - at_least, sorted.len())
            })
            .collect()
    }

    /// Fills exam rank, class rank and percentile, then orders the results by
    /// exam rank (participant id breaks ties) and assigns `seq` 1..=n.
    pub fn apply(results: &mut [StudentResult]) {
        let nets: Vec<Decimal> = results.iter().map(|r| r.net).collect();
        let exam_ranks = Self::ranks(&nets);
        let percentiles = Self::percentiles(&nets);

        let mut classes: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, r) in results.iter().enumerate() {
            if let Some(class) = class_key(r) {
                classes.entry(class).or_default().push(idx);
            }
        }

        for (idx, r) in results.iter_mut().enumerate() {
            r.rank_in_exam = exam_ranks[idx];
            r.percentile = percentiles[idx];
            r.rank_in_class = None;
        }

        for members in classes.values() {
            let class_nets: Vec<Decimal> = members.iter().map(|&i| nets[i]).collect();
            for (&idx, rank) in members.iter().zip(Self::ranks(&class_nets)) {
                results[idx].rank_in_class = Some(rank);
            }
        }

        results.sort_by(|a, b| {
            a.rank_in_exam
                .cmp(&b.rank_in_exam)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        for (idx, r) in results.iter_mut().enumerate() {
            r.seq = idx as u32 + 1;
        }
    }

    fn sorted_desc(nets: &[Decimal]) -> Vec<Decimal> {
        let mut sorted = nets.to_vec();
        sorted.sort_by(|a, b| b.cmp(a));
        sorted
    }
}

fn class_key(result: &StudentResult) -> Option<String> {
    result
        .class_name
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn result(net: i64, class: Option<&str>) -> StudentResult {
        StudentResult {
            seq: 0,
            exam_id: Uuid::nil(),
            participant_id: Uuid::new_v4(),
            class_name: class.map(str::to_string),
            booklet: None,
            total_correct: 0,
            total_wrong: 0,
            total_blank: 0,
            net: d(net),
            rank_in_exam: 0,
            rank_in_class: None,
            percentile: Decimal::ZERO,
            subjects: Vec::new(),
            topics: Vec::new(),
        }
    }

    #[test]
    fn ties_share_rank_and_next_rank_skips() {
        let ranks = RankingService::ranks(&[d(50), d(70), d(50), d(30), d(70)]);
        assert_eq!(ranks, vec![3, 1, 3, 5, 1]);
    }

    #[test]
    fn percentile_counts_strictly_lower() {
        let p = RankingService::percentiles(&[d(10), d(20), d(20), d(40)]);
        assert_eq!(p, vec![d(0), d(25), d(25), d(75)]);
        assert_eq!(RankingService::percentile(0, 0), Decimal::ZERO);
        assert_eq!(RankingService::percentile(1, 3), Decimal::new(3333, 2));
    }

    #[test]
    fn percentile_is_monotonic_in_net() {
        let nets: Vec<Decimal> = [12, -3, 40, 12, 0, 7, 40, 25].iter().map(|&v| d(v)).collect();
        let p = RankingService::percentiles(&nets);
        for i in 0..nets.len() {
            for j in 0..nets.len() {
                if nets[i] < nets[j] {
                    assert!(p[i] <= p[j]);
                }
                if nets[i] == nets[j] {
                    assert_eq!(p[i], p[j]);
                }
            }
        }
    }

    #[test]
    fn class_ranks_are_independent() {
        let mut results = vec![
            result(80, Some("9-A")),
            result(60, Some("9-B")),
            result(70, Some("9-A")),
            result(90, Some(" 9-B ")),
            result(50, None),
        ];
        RankingService::apply(&mut results);

        let by_net = |n: i64| results.iter().find(|r| r.net == d(n)).unwrap();
        assert_eq!(by_net(90).rank_in_exam, 1);
        assert_eq!(by_net(90).rank_in_class, Some(1));
        assert_eq!(by_net(60).rank_in_class, Some(2));
        assert_eq!(by_net(80).rank_in_class, Some(1));
        assert_eq!(by_net(70).rank_in_class, Some(2));
        assert_eq!(by_net(50).rank_in_class, None);
        assert_eq!(by_net(50).rank_in_exam, 5);

        let seqs: Vec<u32> = results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(results[0].net, d(90));
    }
}

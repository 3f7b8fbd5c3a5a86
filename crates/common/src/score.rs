/// Reddit-style ranking score.
///
/// `vote_diff` is upvotes minus downvotes and `publish_ts` / `epoch` are unix
/// seconds. The magnitude term saturates at log10(1) for a tied post so a
/// fresh post never ranks below zero on age alone.
pub fn reddit_score(publish_ts: i64, vote_diff: i64, epoch: i64) -> f64 {
    let age = (publish_ts - epoch) as f64;
    let sign = match vote_diff {
        d if d > 0 => 1.0,
        0 => 0.0,
        _ => -1.0,
    };
    let magnitude = (vote_diff.unsigned_abs().max(1)) as f64;
    magnitude.log10() + sign * age / 45_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tied_post_scores_zero() {
        assert_eq!(reddit_score(45_000, 0, 0), 0.0);
    }

    #[test]
    fn newer_posts_outrank_older_ones_at_equal_votes() {
        let old = reddit_score(1_000, 10, 0);
        let new = reddit_score(90_000, 10, 0);
        assert!(new > old);
    }

    #[test]
    fn downvoted_posts_decay_with_age() {
        let score = reddit_score(45_000, -10, 0);
        assert!(score.abs() < 1e-9);
        let newer = reddit_score(90_000, -10, 0);
        assert!(newer < score);
    }

    #[test]
    fn one_vote_adds_a_fixed_time_equivalent() {
        // 45 000 seconds of age are worth one order of magnitude of votes.
        let a = reddit_score(0, 100, 0);
        let b = reddit_score(45_000, 10, 0);
        assert!((a - b).abs() < 1e-9);
    }
}

use crate::state::catalog::ChallengeDefinition;

/// Points awarded for a correct submission given how many teams solved the challenge before.
///
/// `prior_solves` is the solve counter read *before* the submission is applied, so the first
/// team receives the base value. The award never drops below the challenge floor.
pub fn points(challenge: &ChallengeDefinition, prior_solves: u32) -> u32 {
    let penalty = prior_solves.saturating_mul(challenge.decay);
    challenge
        .base_points
        .saturating_sub(penalty)
        .max(challenge.floor_points)
}

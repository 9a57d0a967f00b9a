use std::ops::RangeInclusive;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Duration;

use crate::directory::Instance;
use crate::messages::InstanceId;

/// Random draws tried before picking among the other instances directly.
pub const MAX_DRAWS: usize = 32;

/// Picks a random instance other than `own_id`.
///
/// Returns `None` when fewer than two instances are live, or when every
/// live entry turns out to be this instance.
pub fn choose_peer<'a, R>(rng: &mut R, own_id: &InstanceId, instances: &'a [Instance])
    -> Option<&'a Instance>
    where R: Rng + ?Sized
{
    if instances.len() < 2 {
        return None;
    }

    for _ in 0..MAX_DRAWS {
        let candidate = &instances[rng.gen_range(0..instances.len())];
        if &candidate.id != own_id {
            return Some(candidate);
        }
    }

    let others: Vec<&Instance> = instances.iter()
        .filter(|instance| &instance.id != own_id)
        .collect();
    others.choose(rng).copied()
}

/// Uniform delay in whole milliseconds, both bounds included.
pub fn pass_delay<R>(rng: &mut R, millis: RangeInclusive<u64>) -> Duration
    where R: Rng + ?Sized
{
    Duration::from_millis(rng.gen_range(millis))
}

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Build the stable node identity announced to the coordinator.
///
/// The suffix is drawn from a seeded RNG when `random_seed` is non-zero so
/// a fleet can be given reproducible identities; a zero seed falls back to
/// the thread RNG.
pub(crate) fn build_node_id(random_seed: u64) -> String {
    let suffix = if random_seed == 0 {
        rand::thread_rng().next_u64()
    } else {
        StdRng::seed_from_u64(random_seed).next_u64()
    };
    format!("{}_{:016x}", hostname(), suffix)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_node_id_is_deterministic() {
        let first = build_node_id(42);
        let second = build_node_id(42);
        if first != second {
            panic!("Seeded node ids differ: {} vs {}", first, second);
        }
    }

    #[test]
    fn distinct_seeds_produce_distinct_suffixes() {
        let first = build_node_id(1);
        let second = build_node_id(2);
        if first == second {
            panic!("Distinct seeds collided: {}", first);
        }
    }

    #[test]
    fn node_id_carries_hostname_prefix() {
        let id = build_node_id(7);
        let prefix = hostname();
        if !id.starts_with(&prefix) {
            panic!("Node id {} missing hostname prefix {}", id, prefix);
        }
    }
}

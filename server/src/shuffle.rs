use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::GameId;

/// How games randomize the tile pool and the order players receive tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShuffleMode {
    #[default]
    Random,
    /// Deterministic per game: the rng is seeded with the seed plus the game id.
    Seeded(u64),
    /// Leaves order untouched.
    Identity,
}

impl ShuffleMode {
    pub fn shuffler(self, game_id: GameId) -> Shuffler {
        match self {
            ShuffleMode::Random => Shuffler::Random,
            ShuffleMode::Seeded(seed) => {
                Shuffler::Seeded(StdRng::seed_from_u64(seed.wrapping_add(u64::from(game_id))))
            }
            ShuffleMode::Identity => Shuffler::Identity,
        }
    }
}

/// Owned by a single game, so no synchronization is needed.
#[derive(Debug)]
pub enum Shuffler {
    Random,
    Seeded(StdRng),
    Identity,
}

impl Shuffler {
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        match self {
            Shuffler::Random => items.shuffle(&mut rand::thread_rng()),
            Shuffler::Seeded(rng) => items.shuffle(rng),
            Shuffler::Identity => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_keeps_order() {
        let mut items = vec![1, 2, 3, 4];
        ShuffleMode::Identity.shuffler(1).shuffle(&mut items);
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_seeded_is_repeatable_per_game() {
        let original: Vec<u32> = (0..50).collect();

        let mut a = original.clone();
        let mut b = original.clone();
        ShuffleMode::Seeded(7).shuffler(3).shuffle(&mut a);
        ShuffleMode::Seeded(7).shuffler(3).shuffle(&mut b);
        assert_eq!(a, b);

        let mut c = original.clone();
        ShuffleMode::Seeded(7).shuffler(4).shuffle(&mut c);
        assert_ne!(a, c);

        a.sort_unstable();
        assert_eq!(a, original);
    }
}

pub mod pair_registry;

pub use pair_registry::{MatchOutcome, PairRegistry, RegistryCounts};

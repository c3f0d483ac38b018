//! Human readable `adjective-noun` identifiers for sparks.
//!
//! The generated name is the join key for everything a spark owns: the database,
//! the workload and every `<name>-<suffix>` object next to it.

use rand::{Rng, seq::IndexedRandom};
use snafu::{Snafu, ensure};

use crate::constants::VOLUME_CLAIM_SUFFIX;

pub const ADJECTIVES: [&str; 25] = [
    "brave", "clever", "gentle", "happy", "kind", "lively", "nice", "proud", "calm", "eager",
    "bright", "swift", "bold", "wise", "fair", "jolly", "keen", "wild", "quiet", "grand", "mighty",
    "noble", "quick", "sharp", "warm",
];

pub const NOUNS: [&str; 25] = [
    "dolphin", "eagle", "fox", "hawk", "lion", "otter", "panda", "raven", "tiger", "wolf", "bear",
    "deer", "falcon", "moose", "owl", "rabbit", "salmon", "sparrow", "whale", "zebra", "badger",
    "coyote", "ferret", "lynx", "orca",
];

/// Kubernetes object names are DNS-1123 labels, the longest derived name is
/// `<name>-storage`.
const MAX_NAME_LENGTH: usize = 63 - VOLUME_CLAIM_SUFFIX.len();

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum Error {
    #[snafu(display("spark name must not be empty"))]
    EmptyName,

    #[snafu(display(
        "spark name {name:?} is longer than {MAX_NAME_LENGTH} characters"
    ))]
    NameTooLong { name: String },

    #[snafu(display(
        "spark name {name:?} must consist of lowercase alphanumerics and '-', starting and ending with an alphanumeric"
    ))]
    InvalidCharacters { name: String },
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    // Both vocabularies are non-empty constants.
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or(ADJECTIVES[0]);
    let noun = NOUNS.choose(rng).copied().unwrap_or(NOUNS[0]);
    format!("{adjective}-{noun}")
}

/// Draws up to `attempts` names and returns the first one not contained in `taken`.
pub fn generate_unused<R: Rng + ?Sized>(
    rng: &mut R,
    taken: &[String],
    attempts: usize,
) -> Option<String> {
    (0..attempts)
        .map(|_| generate_with(rng))
        .find(|candidate| !taken.iter().any(|existing| existing == candidate))
}

/// Checks a caller supplied spark name before it is used to address cluster objects.
pub fn validate_spark_name(name: &str) -> Result<(), Error> {
    ensure!(!name.is_empty(), EmptyNameSnafu);
    ensure!(
        name.len() <= MAX_NAME_LENGTH,
        NameTooLongSnafu { name }
    );

    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_edges = !name.starts_with('-') && !name.ends_with('-');
    ensure!(valid_chars && valid_edges, InvalidCharactersSnafu { name });

    Ok(())
}

use rusqlite::Connection;
use sha2::{Digest, Sha256};

/// Compound agent names are `adjective-animal`, picked deterministically from
/// a SHA-256 of the registration seed and retried on collision.
pub const ADJECTIVES: [&str; 48] = [
    "amber", "bold", "brisk", "calm", "candid", "cheery", "clever", "cosmic", "crafty", "daring",
    "deft", "dusty", "eager", "fabled", "fierce", "frosty", "gentle", "glad", "golden", "hardy",
    "humble", "jolly", "keen", "lively", "lucky", "mellow", "merry", "mighty", "nimble", "noble",
    "plucky", "proud", "quick", "quiet", "rapid", "rustic", "shrewd", "silent", "sly", "snappy",
    "spry", "stout", "sunny", "swift", "tidy", "vivid", "wily", "zesty",
];

pub const ANIMALS: [&str; 48] = [
    "badger", "bat", "bear", "beaver", "bison", "crane", "crow", "deer", "dingo", "dove",
    "falcon", "ferret", "finch", "fox", "gecko", "hare", "hawk", "heron", "ibis", "jay",
    "koala", "lemur", "lynx", "magpie", "marmot", "mole", "moose", "newt", "otter", "owl",
    "panda", "pika", "possum", "quail", "rabbit", "raven", "robin", "seal", "shrew", "sparrow",
    "stoat", "swan", "tapir", "toad", "vole", "weasel", "wren", "yak",
];

pub fn compound_name(seed: &str, attempt: u32) -> String {
    let digest = Sha256::digest(format!("{seed}:{attempt}").as_bytes());
    let adjective = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let animal =
        ANIMALS[(digest[1] as usize | (digest[2] as usize) << 8) % ANIMALS.len()];
    format!("{adjective}-{animal}")
}

/// Allocate a globally unique agent name. Collisions walk the attempt
/// counter; if the seed neighborhood is somehow exhausted, fall back to a
/// numeric suffix.
pub fn allocate_name(conn: &Connection, seed: &str) -> String {
    for attempt in 0..16 {
        let name = compound_name(seed, attempt);
        if !name_taken(conn, &name) {
            return name;
        }
    }
    let base = compound_name(seed, 0);
    let mut n = 2u32;
    loop {
        let name = format!("{base}-{n}");
        if !name_taken(conn, &name) {
            return name;
        }
        n += 1;
    }
}

fn name_taken(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM agents WHERE agent_name = ?1",
        [name],
        |r| r.get::<_, i64>(0),
    )
    .unwrap_or(0)
        > 0
}

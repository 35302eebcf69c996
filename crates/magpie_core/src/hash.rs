use xxhash_rust::xxh3::Xxh3;
use xxhash_rust::xxh3::xxh3_64;

/// Hasher used for generating identifiers (asset ids, bundle ids, environment
/// ids).
///
/// These hashes don't need to be fast, but they must be stable across runs,
/// machines, platforms and versions: they end up in output file names and in
/// caches.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: impl AsRef<str>) -> String {
  hash_bytes(s.as_ref().as_bytes())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
  let res = xxh3_64(bytes);
  format!("{:016x}", res)
}

use std::hash::{Hash, Hasher};
use std::path::Path;

use siphasher::sip128::{Hasher128, SipHasher13};

use crate::Result;

/// Stable (not randomly keyed) hex digest of any hashable value.
pub fn hash_to_str<T: Hash + ?Sized>(t: &T) -> String {
    let mut s = SipHasher13::new();
    t.hash(&mut s);
    format!("{:032x}", s.finish128().as_u128())
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut s = SipHasher13::new();
    s.write(bytes);
    format!("{:032x}", s.finish128().as_u128())
}

/// Content fingerprint of a file; `None` when it does not exist.
pub fn file_fingerprint(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(hash_bytes(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre::eyre!("failed to read {}: {e}", path.display())),
    }
}

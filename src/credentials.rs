//! Round-robin pool of provider credentials with permanent invalidation.
//!
//! The pool is shared by every running generation. Cursor movement and
//! invalidation happen under one lock so concurrent attempts see a consistent
//! rotation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// One provider secret plus its fixed position in the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
  position: usize,
  secret: Arc<str>,
}

impl Credential {
  pub fn position(&self) -> usize { self.position }
  pub fn secret(&self) -> &str { &self.secret }
}

// Never print the secret itself.
impl fmt::Debug for Credential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credential").field("position", &self.position).finish_non_exhaustive()
  }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no valid credentials remain in the pool")]
pub struct PoolExhausted;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PoolStatus {
  pub total: usize,
  pub valid: usize,
  pub invalid: usize,
}

struct PoolInner {
  credentials: Vec<Credential>,
  invalid: HashSet<usize>,
  cursor: usize,
}

pub struct CredentialPool {
  inner: Mutex<PoolInner>,
}

impl CredentialPool {
  /// Build a pool from raw secrets. Blank entries and duplicates are dropped.
  pub fn new<I, S>(secrets: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut seen = HashSet::new();
    let credentials: Vec<Credential> = secrets
      .into_iter()
      .map(|s| s.as_ref().trim().to_string())
      .filter(|s| !s.is_empty() && seen.insert(s.clone()))
      .enumerate()
      .map(|(position, s)| Credential { position, secret: Arc::from(s) })
      .collect();

    info!(target: "generation", total = credentials.len(), "Credential pool initialized");
    Self {
      inner: Mutex::new(PoolInner { credentials, invalid: HashSet::new(), cursor: 0 }),
    }
  }

  /// Number of configured credentials, valid or not.
  pub fn len(&self) -> usize { self.inner.lock().credentials.len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Next valid credential in round-robin order.
  pub fn next(&self) -> Result<Credential, PoolExhausted> {
    let mut inner = self.inner.lock();
    let n = inner.credentials.len();
    for step in 0..n {
      let idx = (inner.cursor + step) % n;
      if !inner.invalid.contains(&idx) {
        inner.cursor = (idx + 1) % n;
        return Ok(inner.credentials[idx].clone());
      }
    }
    Err(PoolExhausted)
  }

  /// Permanently exclude a credential. Idempotent.
  pub fn invalidate(&self, credential: &Credential) {
    let mut inner = self.inner.lock();
    let known = inner
      .credentials
      .get(credential.position)
      .is_some_and(|c| c.secret == credential.secret);
    if !known {
      return;
    }
    if inner.invalid.insert(credential.position) {
      let remaining = inner.credentials.len() - inner.invalid.len();
      warn!(target: "generation", position = credential.position, remaining, "Credential invalidated");
    }
  }

  pub fn status(&self) -> PoolStatus {
    let inner = self.inner.lock();
    let total = inner.credentials.len();
    let invalid = inner.invalid.len();
    PoolStatus { total, valid: total - invalid, invalid }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pool(n: usize) -> CredentialPool {
    CredentialPool::new((0..n).map(|i| format!("key-{i}")))
  }

  #[test]
  fn rotates_round_robin() {
    let p = pool(3);
    let seen: Vec<usize> = (0..6).map(|_| p.next().unwrap().position()).collect();
    assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
  }

  #[test]
  fn skips_invalidated_and_cycles_valid_ones() {
    let p = pool(5);
    let first = p.next().unwrap();
    p.invalidate(&first);
    let c2 = p.next().unwrap();
    p.invalidate(&c2);

    // N = 5, k = 2: exactly 3 distinct valid credentials before repeating.
    let cycle: Vec<usize> = (0..3).map(|_| p.next().unwrap().position()).collect();
    let mut distinct = cycle.clone();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 3);
    assert!(!cycle.contains(&first.position()));
    assert!(!cycle.contains(&c2.position()));
    assert_eq!(p.next().unwrap().position(), cycle[0]);
  }

  #[test]
  fn exhausted_when_all_invalid() {
    let p = pool(3);
    for _ in 0..3 {
      let c = p.next().unwrap();
      p.invalidate(&c);
    }
    for _ in 0..4 {
      assert_eq!(p.next(), Err(PoolExhausted));
    }
    assert_eq!(p.status(), PoolStatus { total: 3, valid: 0, invalid: 3 });
  }

  #[test]
  fn empty_pool_is_exhausted() {
    let p = CredentialPool::new(["", "  "]);
    assert_eq!(p.len(), 0);
    assert_eq!(p.next(), Err(PoolExhausted));
  }

  #[test]
  fn invalidate_is_idempotent_and_ignores_foreign_credentials() {
    let p = pool(2);
    let c = p.next().unwrap();
    p.invalidate(&c);
    p.invalidate(&c);
    assert_eq!(p.status(), PoolStatus { total: 2, valid: 1, invalid: 1 });

    let foreign = Credential { position: 1, secret: Arc::from("not-in-pool") };
    p.invalidate(&foreign);
    assert_eq!(p.status().invalid, 1);
  }

  #[test]
  fn duplicates_are_dropped_and_debug_hides_secret() {
    let p = CredentialPool::new(["sk-alpha", "sk-beta", "sk-alpha"]);
    assert_eq!(p.len(), 2);
    let c = p.next().unwrap();
    assert_eq!(c.secret(), "sk-alpha");
    assert!(!format!("{c:?}").contains("sk-alpha"));
  }

  #[test]
  fn concurrent_draws_are_distinct_within_a_round() {
    let p = Arc::new(pool(4));
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let p = Arc::clone(&p);
        std::thread::spawn(move || p.next().unwrap().position())
      })
      .collect();
    let mut got: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    got.sort_unstable();
    assert_eq!(got, vec![0, 1, 2, 3]);
  }
}

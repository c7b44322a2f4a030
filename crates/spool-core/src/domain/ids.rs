//! Task identity generation.
//!
//! Identities are opaque strings. Callers may supply their own; when a task
//! arrives without one the manager asks its [`IdGenerator`].
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、登録順で一覧できる
//! - **分散生成可能**: manager 間で調整なしに生成できる
//! - 26 文字、Crockford base32

use chrono::Utc;
use ulid::Ulid;

/// Generates identities for tasks submitted without one.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// ULID from the wall clock plus 80 random bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> String {
        let timestamp_ms = Utc::now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random()).to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator;

        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 26);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id_gen = UlidGenerator;
        let id1 = id_gen.generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = id_gen.generate();

        assert!(id1 < id2);
    }

    #[test]
    fn closures_are_generators() {
        let id_gen = || "fixed".to_string();
        assert_eq!(IdGenerator::generate(&id_gen), "fixed");
    }
}

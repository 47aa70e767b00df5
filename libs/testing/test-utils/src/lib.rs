//! Shared test utilities for the task bus crates
//!
//! - `TestRedis`: Redis container with automatic cleanup (feature: "redis")
//! - `TestDataBuilder`: Deterministic task data for tests (always available)
//! - `assertions`: Custom assertion helpers (always available)
//!
//! # Redis Testing
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//! use service_bus::RedisBus;
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_bus_test() {
//!     let redis = TestRedis::new().await;
//!     let bus = RedisBus::new(redis.connection_manager().await);
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for task data with deterministic values
///
/// Tests stay reproducible because everything derives from one seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed from the test name (recommended)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_publish_task");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic task id; `n` distinguishes tasks within one test
    pub fn task_id(&self, n: u64) -> Uuid {
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        uuid_bytes[8..16].copy_from_slice(&n.to_le_bytes());
        Uuid::from_bytes(uuid_bytes)
    }

    /// Task title such as `"Task 1234-main"`
    pub fn title(&self, suffix: &str) -> String {
        format!("Task {}-{}", self.seed % 10_000, suffix)
    }

    /// Assignee email such as `"user-1234@example.com"`
    pub fn assignee(&self) -> String {
        format!("user-{}@example.com", self.seed % 10_000)
    }

    /// Name unique to this test, for keys and entity names
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// let topic = builder.name("topic", "events");
    /// assert!(topic.starts_with("test-topic-"));
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

/// Test assertion helpers
pub mod assertions {
    use uuid::Uuid;

    pub fn assert_uuid_eq(actual: Uuid, expected: Uuid, context: &str) {
        assert_eq!(
            actual, expected,
            "{}: expected UUID {}, got {}",
            context, expected, actual
        );
    }

    /// Assert that an optional value is Some and return it
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}

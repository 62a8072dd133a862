//! Cache freshness policy registry
//!
//! Maps hierarchical resource keys (`["mail", "messages"]`, `["rules"]`, ...)
//! to a retention time and a staleness window. The data-fetching layer asks
//! the registry how long a result may be kept and when it should be refreshed
//! in the background; the registry itself never fetches anything.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

const MINUTE: Duration = Duration::from_secs(60);

/// Retention used when no entry matches.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60);

/// Staleness window used when no entry matches.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// How long a cached result may be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Evicted once older than the duration.
    For(Duration),
    /// Never evicted. The result is mirrored to durable storage.
    Forever,
}

impl Retention {
    /// Returns true if `age` is still within retention.
    pub fn retains(self, age: Duration) -> bool {
        match self {
            Self::For(ttl) => age < ttl,
            Self::Forever => true,
        }
    }

    /// The finite duration, if any.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::For(ttl) => Some(ttl),
            Self::Forever => None,
        }
    }
}

impl fmt::Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::For(ttl) => write!(f, "{}ms", ttl.as_millis()),
            Self::Forever => write!(f, "forever"),
        }
    }
}

/// State of a cached result of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as is.
    Fresh,
    /// Serve, but refresh in the background.
    Stale,
    /// Past retention; drop it.
    Expired,
}

/// A resource key: a namespace plus an optional sub-resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    namespace: String,
    resource: Option<String>,
}

impl ResourceKey {
    /// A key that covers every sub-resource of `namespace`.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource: None,
        }
    }

    /// A key for one sub-resource.
    pub fn resource(namespace: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource: Some(resource.into()),
        }
    }

    fn matches(&self, segments: &[&str]) -> bool {
        match (&self.resource, segments) {
            (Some(resource), [namespace, sub, ..]) => {
                self.namespace == *namespace && resource == sub
            }
            (None, [namespace, ..]) => self.namespace == *namespace,
            _ => false,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}/{}", self.namespace, resource),
            None => write!(f, "{}", self.namespace),
        }
    }
}

/// Policy for one resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicyEntry {
    pub key: ResourceKey,
    pub ttl: Retention,
    pub stale_after: Duration,
}

impl CachePolicyEntry {
    pub fn new(key: ResourceKey, ttl: Retention, stale_after: Duration) -> Self {
        Self {
            key,
            ttl,
            stale_after,
        }
    }
}

/// Errors building a registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CachePolicyError {
    #[error("staleness window for {0} exceeds its retention")]
    StaleExceedsTtl(String),

    #[error("duplicate cache policy for {0}")]
    Duplicate(String),
}

/// Immutable lookup table from resource keys to cache policy.
#[derive(Debug, Clone)]
pub struct CachePolicyRegistry {
    entries: Vec<CachePolicyEntry>,
    default_ttl: Duration,
    default_stale_after: Duration,
}

impl CachePolicyRegistry {
    /// Builds a registry, rejecting duplicate keys and `stale_after > ttl`.
    pub fn new(entries: Vec<CachePolicyEntry>) -> Result<Self, CachePolicyError> {
        for (index, entry) in entries.iter().enumerate() {
            if let Retention::For(ttl) = entry.ttl {
                if entry.stale_after > ttl {
                    return Err(CachePolicyError::StaleExceedsTtl(entry.key.to_string()));
                }
            }
            if entries[..index].iter().any(|earlier| earlier.key == entry.key) {
                return Err(CachePolicyError::Duplicate(entry.key.to_string()));
            }
        }

        Ok(Self {
            entries,
            default_ttl: DEFAULT_TTL,
            default_stale_after: DEFAULT_STALE_AFTER,
        })
    }

    /// The registry the mail client ships with.
    pub fn standard() -> &'static CachePolicyRegistry {
        static STANDARD: OnceLock<CachePolicyRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| CachePolicyRegistry {
            entries: standard_entries(),
            default_ttl: DEFAULT_TTL,
            default_stale_after: DEFAULT_STALE_AFTER,
        })
    }

    /// Finds the entry for `segments`: a two-segment match wins over a
    /// namespace-wide one.
    pub fn policy_for(&self, segments: &[&str]) -> Option<&CachePolicyEntry> {
        self.entries
            .iter()
            .find(|entry| entry.key.resource.is_some() && entry.key.matches(segments))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| entry.key.resource.is_none() && entry.key.matches(segments))
            })
    }

    /// Retention for `segments`, falling back to [`DEFAULT_TTL`].
    pub fn ttl_for(&self, segments: &[&str]) -> Retention {
        self.policy_for(segments)
            .map(|entry| entry.ttl)
            .unwrap_or(Retention::For(self.default_ttl))
    }

    /// Staleness window for `segments`, falling back to [`DEFAULT_STALE_AFTER`].
    pub fn stale_after(&self, segments: &[&str]) -> Duration {
        self.policy_for(segments)
            .map(|entry| entry.stale_after)
            .unwrap_or(self.default_stale_after)
    }

    /// Evaluates a cached result of age `age`.
    pub fn freshness(&self, segments: &[&str], age: Duration) -> Freshness {
        if age < self.stale_after(segments) {
            Freshness::Fresh
        } else if self.ttl_for(segments).retains(age) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    pub fn entries(&self) -> &[CachePolicyEntry] {
        &self.entries
    }
}

fn standard_entries() -> Vec<CachePolicyEntry> {
    let mail = |resource: &str, stale: u32, ttl: Retention| {
        CachePolicyEntry::new(ResourceKey::resource("mail", resource), ttl, MINUTE * stale)
    };
    let namespace = |name: &str, stale: u32, ttl: u32| {
        CachePolicyEntry::new(
            ResourceKey::namespace(name),
            Retention::For(MINUTE * ttl),
            MINUTE * stale,
        )
    };

    vec![
        // synced list is the offline system of record
        mail("messages", 2, Retention::Forever),
        mail("message", 5, Retention::For(MINUTE * 30)),
        mail("thread", 5, Retention::For(MINUTE * 30)),
        mail("profile", 30, Retention::For(MINUTE * 60)),
        mail("labels", 10, Retention::For(MINUTE * 30)),
        mail("search", 1, Retention::For(MINUTE * 5)),
        namespace("rules", 5, 30),
        namespace("folders", 5, 30),
        namespace("notes", 1, 10),
        namespace("calendar", 5, 15),
        namespace("subscriptions", 15, 60),
    ]
}

/// Retention for `segments` in the standard registry.
pub fn ttl_for(segments: &[&str]) -> Retention {
    CachePolicyRegistry::standard().ttl_for(segments)
}

/// Staleness window for `segments` in the standard registry.
pub fn stale_after(segments: &[&str]) -> Duration {
    CachePolicyRegistry::standard().stale_after(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synced_message_list_is_never_evicted() {
        assert_eq!(ttl_for(&["mail", "messages"]), Retention::Forever);
        assert_eq!(stale_after(&["mail", "messages"]), MINUTE * 2);
    }

    #[test]
    fn test_stale_never_exceeds_ttl() {
        for entry in CachePolicyRegistry::standard().entries() {
            if let Retention::For(ttl) = entry.ttl {
                assert!(entry.stale_after <= ttl, "{} is inconsistent", entry.key);
            }
        }
    }

    #[test]
    fn test_only_one_entry_is_forever() {
        let forever: Vec<String> = CachePolicyRegistry::standard()
            .entries()
            .iter()
            .filter(|entry| entry.ttl == Retention::Forever)
            .map(|entry| entry.key.to_string())
            .collect();
        assert_eq!(forever, vec!["mail/messages"]);
    }

    #[test]
    fn test_namespace_entry_covers_sub_resources() {
        assert_eq!(ttl_for(&["rules"]), Retention::For(MINUTE * 30));
        assert_eq!(ttl_for(&["rules", "rule-42"]), Retention::For(MINUTE * 30));
        assert_eq!(stale_after(&["notes", "n1", "extra"]), MINUTE);
    }

    #[test]
    fn test_unknown_keys_fall_back_to_defaults() {
        assert_eq!(ttl_for(&["contacts"]), Retention::For(DEFAULT_TTL));
        assert_eq!(stale_after(&["contacts"]), DEFAULT_STALE_AFTER);
        // "mail" alone matches no two-segment entry
        assert_eq!(ttl_for(&["mail"]), Retention::For(DEFAULT_TTL));
        assert_eq!(ttl_for(&["mail", "drafts"]), Retention::For(DEFAULT_TTL));
        assert_eq!(ttl_for(&[]), Retention::For(DEFAULT_TTL));
    }

    #[test]
    fn test_two_segment_match_beats_namespace() {
        let registry = CachePolicyRegistry::new(vec![
            CachePolicyEntry::new(
                ResourceKey::namespace("calendar"),
                Retention::For(MINUTE * 15),
                MINUTE * 5,
            ),
            CachePolicyEntry::new(
                ResourceKey::resource("calendar", "events"),
                Retention::For(MINUTE * 3),
                MINUTE,
            ),
        ])
        .unwrap();

        assert_eq!(registry.ttl_for(&["calendar", "events"]), Retention::For(MINUTE * 3));
        assert_eq!(registry.ttl_for(&["calendar", "invites"]), Retention::For(MINUTE * 15));
    }

    #[test]
    fn test_freshness_transitions() {
        let registry = CachePolicyRegistry::standard();
        let key = ["mail", "search"];

        assert_eq!(registry.freshness(&key, Duration::from_secs(30)), Freshness::Fresh);
        assert_eq!(registry.freshness(&key, MINUTE), Freshness::Stale);
        assert_eq!(registry.freshness(&key, MINUTE * 5), Freshness::Expired);

        let synced = ["mail", "messages"];
        assert_eq!(
            registry.freshness(&synced, Duration::from_secs(86_400 * 365)),
            Freshness::Stale
        );
    }

    #[test]
    fn test_new_rejects_inconsistent_entries() {
        let err = CachePolicyRegistry::new(vec![CachePolicyEntry::new(
            ResourceKey::namespace("notes"),
            Retention::For(MINUTE),
            MINUTE * 2,
        )])
        .unwrap_err();
        assert_eq!(err, CachePolicyError::StaleExceedsTtl("notes".to_string()));

        let entry = CachePolicyEntry::new(
            ResourceKey::resource("mail", "thread"),
            Retention::For(MINUTE * 30),
            MINUTE * 5,
        );
        let err = CachePolicyRegistry::new(vec![entry.clone(), entry]).unwrap_err();
        assert_eq!(err, CachePolicyError::Duplicate("mail/thread".to_string()));
    }

    #[test]
    fn test_retention_display() {
        assert_eq!(Retention::Forever.to_string(), "forever");
        assert_eq!(Retention::For(Duration::from_millis(1500)).to_string(), "1500ms");
        assert_eq!(Retention::For(MINUTE).as_duration(), Some(MINUTE));
        assert_eq!(Retention::Forever.as_duration(), None);
    }
}

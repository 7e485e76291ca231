//! Resource key derivation
//!
//! Several readings of the same metric type can share one batch (two
//! monitored services both reporting `service_cpu`). The resource key tells
//! them apart: the value of the first tag present in an ordered precedence
//! list, or the empty string. Metric kinds that need another disambiguating
//! tag register it here instead of touching the store.

use crate::model::{Tags, TAG_PATH, TAG_SERVICE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKeyResolver {
    precedence: Vec<String>,
}

impl Default for ResourceKeyResolver {
    /// `service` first, then `path`
    fn default() -> Self {
        Self::new([TAG_SERVICE, TAG_PATH])
    }
}

impl ResourceKeyResolver {
    pub fn new<I, S>(precedence: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut resolver = Self { precedence: Vec::new() };
        for tag in precedence {
            resolver.register(tag);
        }
        resolver
    }

    /// Appends a tag name at the lowest precedence. Already known names keep their rank.
    pub fn register(&mut self, tag: impl Into<String>) -> &mut Self {
        let tag = tag.into();
        if !self.precedence.contains(&tag) {
            self.precedence.push(tag);
        }
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.register(tag);
        self
    }

    pub fn precedence(&self) -> &[String] {
        &self.precedence
    }

    pub fn resolve(&self, tags: &Tags) -> String {
        self.precedence
            .iter()
            .find_map(|name| tags.get(name))
            .map(|value| value.into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_wins_over_path() {
        let resolver = ResourceKeyResolver::default();
        let tags = Tags::new().with_service("x").with_path("/");

        assert_eq!(resolver.resolve(&tags), "x");
    }

    #[test]
    fn test_path_when_no_service() {
        let resolver = ResourceKeyResolver::default();
        let tags = Tags::new().with_unit("gb").with_path("/var");

        assert_eq!(resolver.resolve(&tags), "/var");
    }

    #[test]
    fn test_empty_when_nothing_matches() {
        let resolver = ResourceKeyResolver::default();
        let tags = Tags::new().with_unit("percent").with_pid(12);

        assert_eq!(resolver.resolve(&tags), "");
    }

    #[test]
    fn test_registered_tag_has_lowest_precedence() {
        let resolver = ResourceKeyResolver::default().with_tag("interface");

        let nic = Tags::new().with("interface", "eth0");
        assert_eq!(resolver.resolve(&nic), "eth0");

        let both = Tags::new().with("interface", "eth0").with_path("/");
        assert_eq!(resolver.resolve(&both), "/");
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut resolver = ResourceKeyResolver::default();
        resolver.register("service").register("mount");

        assert_eq!(resolver.precedence(), ["service", "path", "mount"]);
    }
}

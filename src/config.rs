use std::collections::HashMap;
use std::env;

/// Runtime settings, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub sync_channel_capacity: usize,
    /// Answer for confirmation dialogs when no user is attached (web mode)
    pub auto_confirm: bool,
    pub page_sizes: PageSizes,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            sync_channel_capacity: 64,
            auto_confirm: true,
            page_sizes: PageSizes::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut page_sizes = PageSizes::default();
        if let Some(size) = lookup("PAGE_SIZE").and_then(|v| v.parse().ok()) {
            page_sizes.default_size = size;
        }
        for entity in PageSizes::KNOWN_ENTITIES {
            let key = format!("PAGE_SIZE_{}", entity.to_uppercase());
            if let Some(size) = lookup(&key).and_then(|v| v.parse().ok()) {
                page_sizes.per_entity.insert(entity.to_string(), size);
            }
        }

        Self {
            port: lookup("PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
            sync_channel_capacity: lookup("SYNC_CHANNEL_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sync_channel_capacity),
            auto_confirm: lookup("AUTO_CONFIRM")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.auto_confirm),
            page_sizes,
        }
    }
}

/// Table page size per listed entity
#[derive(Debug, Clone)]
pub struct PageSizes {
    pub default_size: usize,
    pub per_entity: HashMap<String, usize>,
}

impl PageSizes {
    const KNOWN_ENTITIES: [&'static str; 3] = ["bookings", "course_dates", "monitors"];

    pub fn for_entity(&self, entity: &str) -> usize {
        self.per_entity.get(entity).copied().unwrap_or(self.default_size).max(1)
    }
}

impl Default for PageSizes {
    fn default() -> Self {
        // the bookings listing is capped at 50 rows by the backend
        let per_entity = HashMap::from([("bookings".to_string(), 50)]);
        Self { default_size: 10, per_entity }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert!(config.auto_confirm);
        assert_eq!(config.page_sizes.for_entity("bookings"), 50);
        assert_eq!(config.page_sizes.for_entity("course_dates"), 10);
    }

    #[test]
    fn environment_overrides() {
        let vars = HashMap::from([
            ("PORT", "9000"),
            ("AUTO_CONFIRM", "false"),
            ("PAGE_SIZE", "25"),
            ("PAGE_SIZE_COURSE_DATES", "5"),
            ("SYNC_CHANNEL_CAPACITY", "not a number"),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.port, 9000);
        assert!(!config.auto_confirm);
        assert_eq!(config.sync_channel_capacity, 64);
        assert_eq!(config.page_sizes.for_entity("course_dates"), 5);
        assert_eq!(config.page_sizes.for_entity("monitors"), 25);
        assert_eq!(config.page_sizes.for_entity("bookings"), 50);
    }
}

//! Types for use when configuring seqgate modules.

use crate::*;
use std::sync::Mutex;

/// helper transcode function
fn tc<S: serde::Serialize, D: serde::de::DeserializeOwned>(
    s: &S,
) -> GwResult<D> {
    serde_json::from_value(
        serde_json::to_value(s).map_err(|e| GwError::other_src("encode", e))?,
    )
    .map_err(|e| GwError::other_src("decode", e))
}

/// Denotes a type used to configure a specific seqgate module.
///
/// A module config is a struct with a single camelCase field named after
/// the module, wrapping the actual parameters, e.g.
/// `{ "excludeCache": { "resendTimeoutMs": 5000 } }`. Several module
/// configs are merged side by side into one [Config] document.
///
/// Module configs should be tolerant to missing properties, since the
/// document can be edited by humans. Use `#[serde(default)]`.
pub trait ModConfig:
    'static
    + Sized
    + Default
    + std::fmt::Debug
    + serde::Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
{
}

/// Gateway configuration document.
#[derive(Debug, Default)]
pub struct Config(Mutex<serde_json::Map<String, serde_json::Value>>);

impl serde::Serialize for Config {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.lock().unwrap().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = serde_json::Map::deserialize(deserializer)?;
        Ok(Self(Mutex::new(map)))
    }
}

impl Config {
    /// Parse a config document from json text.
    pub fn from_json_str(s: &str) -> GwResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| GwError::other_src("invalid config json", e))
    }

    /// Called by module factories when the builder generates a default
    /// configuration. Refuses to overwrite a module that already has a
    /// config entry.
    pub fn add_default_module_config<M: ModConfig>(&self) -> GwResult<()> {
        let value: serde_json::Map<String, serde_json::Value> =
            tc(&M::default())?;
        let mut lock = self.0.lock().unwrap();
        for (k, v) in value {
            if lock.contains_key(&k) {
                return Err(GwError::other(format!(
                    "Refusing to overwrite conflicting module name: {k}"
                )));
            }
            lock.insert(k, v);
        }
        Ok(())
    }

    /// Set (overwrite) the config entries of a module.
    pub fn set_module_config<M: ModConfig>(&self, m: &M) -> GwResult<()> {
        let value: serde_json::Map<String, serde_json::Value> = tc(m)?;
        self.0.lock().unwrap().extend(value);
        Ok(())
    }

    /// Extract a module config. Missing entries yield the module defaults,
    /// extraneous entries are ignored.
    pub fn get_module_config<M: ModConfig>(&self) -> GwResult<M> {
        let lock = self.0.lock().unwrap();
        tc(&*lock)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct CacheParams {
        max_items: u32,
        label: String,
    }

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct CacheModConfig {
        some_cache: CacheParams,
    }

    impl ModConfig for CacheModConfig {}

    #[derive(
        Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize,
    )]
    #[serde(rename_all = "camelCase", default)]
    struct OtherModConfig {
        other_mod: CacheParams,
    }

    impl ModConfig for OtherModConfig {}

    #[test]
    fn config_usage_example() {
        let config = Config::default();
        config.add_default_module_config::<CacheModConfig>().unwrap();
        config.add_default_module_config::<OtherModConfig>().unwrap();

        assert_eq!(
            r#"{"otherMod":{"label":"","maxItems":0},"someCache":{"label":"","maxItems":0}}"#,
            serde_json::to_string(&config).unwrap(),
        );

        // adding the same module twice is refused
        assert!(config.add_default_module_config::<CacheModConfig>().is_err());

        config
            .set_module_config(&CacheModConfig {
                some_cache: CacheParams {
                    max_items: 7,
                    label: "x".into(),
                },
            })
            .unwrap();

        let got: CacheModConfig = config.get_module_config().unwrap();
        assert_eq!(7, got.some_cache.max_items);
    }

    #[test]
    fn tolerant_load() {
        let config = Config::from_json_str(
            r#"{
              "modBAD": { "foo": "bar" },
              "someCache": { "label": "from-disk", "extra": 1 }
            }"#,
        )
        .unwrap();

        let got: CacheModConfig = config.get_module_config().unwrap();
        assert_eq!(
            CacheParams {
                max_items: 0,
                label: "from-disk".into(),
            },
            got.some_cache,
        );

        // unset modules get the default
        let other: OtherModConfig = config.get_module_config().unwrap();
        assert_eq!(OtherModConfig::default(), other);
    }
}

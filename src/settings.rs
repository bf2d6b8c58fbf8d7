//! Settings store
//!
//! Grouped `group -> {property: value}` settings loaded from `settings.json`,
//! plus the read-only option metadata in `options.json`. Reads are served from
//! memory. Every mutation rewrites the whole settings file while holding the
//! write lock, so concurrent saves are applied one after the other.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::camera::Resolution;
use crate::error::{Error, Result};

type Groups = BTreeMap<String, BTreeMap<String, Value>>;

/// Live-view configuration, group `display`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub resolution: Resolution,
    pub framerate: u32,
}

pub struct SettingsStore {
    path: PathBuf,
    groups: RwLock<Groups>,
    options: Value,
}

impl SettingsStore {
    /// Load both files. Either one missing or malformed is an error; the
    /// server does not start without them.
    pub fn load(settings_path: impl AsRef<Path>, options_path: impl AsRef<Path>) -> Result<Self> {
        let settings_path = settings_path.as_ref();
        let options_path = options_path.as_ref();

        let raw = fs::read_to_string(settings_path).map_err(|e| {
            Error::settings(format!("cannot read {}: {}", settings_path.display(), e))
        })?;
        let groups: Groups = serde_json::from_str(&raw).map_err(|e| {
            Error::settings(format!("malformed {}: {}", settings_path.display(), e))
        })?;

        let raw = fs::read_to_string(options_path).map_err(|e| {
            Error::settings(format!("cannot read {}: {}", options_path.display(), e))
        })?;
        let options: Value = serde_json::from_str(&raw).map_err(|e| {
            Error::settings(format!("malformed {}: {}", options_path.display(), e))
        })?;

        tracing::info!(
            settings = %settings_path.display(),
            options = %options_path.display(),
            groups = groups.len(),
            "Settings loaded"
        );

        Ok(Self {
            path: settings_path.to_path_buf(),
            groups: RwLock::new(groups),
            options,
        })
    }

    pub fn get_property(&self, group: &str, name: &str) -> Option<Value> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups.get(group)?.get(name).cloned()
    }

    pub fn get_int(&self, group: &str, name: &str) -> Result<i64> {
        self.get_property(group, name)
            .and_then(|value| value.as_i64())
            .ok_or_else(|| Error::settings(format!("{group}.{name} is missing or not an integer")))
    }

    pub fn get_u32(&self, group: &str, name: &str) -> Result<u32> {
        let value = self.get_int(group, name)?;
        u32::try_from(value)
            .map_err(|_| Error::settings(format!("{group}.{name} out of range: {value}")))
    }

    pub fn display(&self) -> Result<DisplayConfig> {
        Ok(DisplayConfig {
            resolution: Resolution::new(
                self.get_u32("display", "width")?,
                self.get_u32("display", "height")?,
            ),
            framerate: self.get_u32("display", "framerate")?,
        })
    }

    pub fn still_resolution(&self) -> Result<Resolution> {
        Ok(Resolution::new(
            self.get_u32("still", "width")?,
            self.get_u32("still", "height")?,
        ))
    }

    pub fn set_property(&self, group: &str, name: &str, value: Value) -> Result<()> {
        self.set_properties([(group.to_string(), name.to_string(), value)])
    }

    /// Apply several properties as one mutation with a single file rewrite.
    pub fn set_properties<I>(&self, properties: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String, Value)>,
    {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = groups.clone();
        for (group, name, value) in properties {
            let value = sanitize_value(value);
            tracing::debug!(group = %group, property = %name, value = %value, "Setting property");
            updated.entry(group).or_default().insert(name, value);
        }

        persist(&self.path, &updated)?;
        *groups = updated;
        Ok(())
    }

    pub fn all_settings_json(&self) -> Result<String> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        to_pretty_json(&*groups)
    }

    pub fn all_options_json(&self) -> Result<String> {
        to_pretty_json(&self.options)
    }
}

/// Numeric strings, floats and booleans are stored as integers.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Bool(flag) => Value::from(i64::from(flag)),
        Value::String(text) => match text.trim().parse::<i64>() {
            Ok(number) => Value::from(number),
            Err(_) => Value::String(text),
        },
        Value::Number(number) if number.is_f64() => match number.as_f64() {
            Some(float) if float.is_finite() => Value::from(float.trunc() as i64),
            _ => Value::Number(number),
        },
        other => other,
    }
}

/// Sorted keys, four-space indent.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn persist(path: &Path, groups: &Groups) -> Result<()> {
    let body = to_pretty_json(groups)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> SettingsStore {
        let settings = dir.path().join("settings.json");
        let options = dir.path().join("options.json");
        fs::write(
            &settings,
            r#"{"display": {"width": 1280, "height": 720, "framerate": 30},
                "still": {"width": 2592, "height": 1944}}"#,
        )
        .unwrap();
        fs::write(&options, r#"{"display": {"width": [640, 1280, 1920]}}"#).unwrap();
        SettingsStore::load(&settings, &options).unwrap()
    }

    #[test]
    fn numeric_strings_are_stored_as_integers() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.set_property("display", "width", json!("1920")).unwrap();
        assert_eq!(store.get_property("display", "width"), Some(json!(1920)));

        store.set_property("display", "width", json!(1920)).unwrap();
        assert_eq!(store.get_int("display", "width").unwrap(), 1920);
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_value(json!(" 42 ")), json!(42));
        assert_eq!(sanitize_value(json!("-7")), json!(-7));
        assert_eq!(sanitize_value(json!(12.9)), json!(12));
        assert_eq!(sanitize_value(json!("auto")), json!("auto"));
        assert_eq!(sanitize_value(json!("1.5")), json!("1.5"));
        assert_eq!(sanitize_value(json!(true)), json!(1));
        assert_eq!(sanitize_value(json!(false)), json!(0));
    }

    #[test]
    fn file_is_rewritten_sorted_and_indented() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_property("display", "framerate", json!(25)).unwrap();

        let written = fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let expected = "{\n    \"display\": {\n        \"framerate\": 25,\n        \"height\": 720,\n        \"width\": 1280\n    },\n    \"still\": {\n        \"height\": 1944,\n        \"width\": 2592\n    }\n}";
        assert_eq!(written, expected);
        assert_eq!(store.all_settings_json().unwrap(), expected);
    }

    #[test]
    fn unknown_group_is_created() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_property("network", "hostname", json!("picam")).unwrap();
        assert_eq!(store.get_property("network", "hostname"), Some(json!("picam")));
    }

    #[test]
    fn display_and_still_configuration() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(
            store.display().unwrap(),
            DisplayConfig {
                resolution: Resolution::new(1280, 720),
                framerate: 30
            }
        );
        assert_eq!(store.still_resolution().unwrap(), Resolution::new(2592, 1944));
    }

    #[test]
    fn missing_or_malformed_files_fail_to_load() {
        let dir = TempDir::new().unwrap();
        let settings = dir.path().join("settings.json");
        let options = dir.path().join("options.json");
        assert!(matches!(
            SettingsStore::load(&settings, &options),
            Err(Error::Settings(_))
        ));

        fs::write(&settings, "{\"display\": 3}").unwrap();
        fs::write(&options, "{}").unwrap();
        assert!(matches!(
            SettingsStore::load(&settings, &options),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn concurrent_saves_with_disjoint_keys_both_persist() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .set_property("extra", &format!("key{i}"), json!(i))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reloaded = SettingsStore::load(
            dir.path().join("settings.json"),
            dir.path().join("options.json"),
        )
        .unwrap();
        for i in 0..8 {
            assert_eq!(
                reloaded.get_property("extra", &format!("key{i}")),
                Some(json!(i))
            );
        }
    }
}

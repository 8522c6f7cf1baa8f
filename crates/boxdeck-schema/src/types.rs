//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings so they can sit directly
//! in manifest and feed payloads.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Unique name of an installable app or driver.
    ComponentName
);

string_newtype!(
    /// Version/revision token pinning the exact manifest content used for an install.
    Revision
);

string_newtype!(
    /// Identifier of a data-source topic a component produces or consumes.
    Topic
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn component_name_display_and_as_ref() {
        let name = ComponentName::new("weather-app");
        assert_eq!(name.to_string(), "weather-app");
        assert_eq!(name.as_str(), "weather-app");
        assert_eq!(AsRef::<str>::as_ref(&name), "weather-app");
        assert_eq!(name, "weather-app");
    }

    #[test]
    fn serializes_as_plain_string() {
        let name = ComponentName::new("driver-phillips-hue");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"driver-phillips-hue\"");
    }

    #[test]
    fn borrow_allows_str_lookup_in_maps() {
        let mut map = BTreeMap::new();
        map.insert(ComponentName::new("a"), 1);
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn topic_into_inner() {
        let t = Topic::new("weather/temperature".to_owned());
        assert_eq!(t.into_inner(), "weather/temperature");
    }
}

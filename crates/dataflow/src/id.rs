use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a named data product, e.g. `/Event/MyData`.
///
/// Keys are normalized on construction: surrounding whitespace and trailing
/// `/` are dropped from each colon-separated token, so `/Event/MyData/` and
/// `/Event/MyData` name the same product. A key with several tokens
/// (`/Event/A:/Event/B`) lists alternative locations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataObjID {
    class_name: Option<String>,
    key: String,
}

impl DataObjID {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self {
            class_name: None,
            key: normalize_key(key.as_ref()),
        }
    }

    pub fn with_class(class_name: impl Into<String>, key: impl AsRef<str>) -> Self {
        Self {
            class_name: Some(class_name.into()),
            key: normalize_key(key.as_ref()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// True when the key lists more than one alternative location.
    pub fn is_multi(&self) -> bool {
        self.key.contains(':')
    }

    /// The alternative locations, in declaration order. A single-key id
    /// yields itself.
    pub fn alternatives(&self) -> Vec<DataObjID> {
        self.key
            .split(':')
            .filter(|k| !k.is_empty())
            .map(|k| DataObjID {
                class_name: self.class_name.clone(),
                key: k.to_string(),
            })
            .collect()
    }

    /// Same class, different key.
    pub fn with_key(&self, key: impl AsRef<str>) -> Self {
        Self {
            class_name: self.class_name.clone(),
            key: normalize_key(key.as_ref()),
        }
    }
}

fn normalize_key(raw: &str) -> String {
    raw.split(':')
        .map(|tok| {
            let tok = tok.trim();
            match tok.trim_end_matches('/') {
                "" if tok.starts_with('/') => "/",
                t => t,
            }
        })
        .collect::<Vec<_>>()
        .join(":")
}

impl fmt::Display for DataObjID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class_name {
            Some(class) => write!(f, "{} [{}]", self.key, class),
            None => f.write_str(&self.key),
        }
    }
}

impl From<&str> for DataObjID {
    fn from(key: &str) -> Self {
        DataObjID::new(key)
    }
}

impl From<String> for DataObjID {
    fn from(key: String) -> Self {
        DataObjID::new(key)
    }
}

/// How a component accesses a data product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    /// Read-modify: the product appears in both the input and output sets.
    Update,
}

impl AccessMode {
    pub fn reads(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::Update)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::Update)
    }
}

//! Case-insensitive header storage that remembers the caller's spelling.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::transport::TransportError;

/// Session-level headers.
///
/// Keys compare case-insensitively; the most recent spelling is kept for
/// display so `describe()` shows `User-Agent` rather than `user-agent`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HeaderTable {
    entries: BTreeMap<String, (String, String)>,
}

impl HeaderTable {
    pub(crate) fn upsert(&mut self, name: &str, value: &str) {
        self.entries.insert(
            name.to_ascii_lowercase(),
            (name.to_string(), value.to_string()),
        );
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot keyed by the caller's spelling.
    pub(crate) fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .values()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Converts into a wire header map.
    pub(crate) fn to_header_map(&self) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in self.entries.values() {
            insert_header(&mut map, name, value)?;
        }
        Ok(map)
    }
}

/// Inserts (replacing) a header after validating name and value.
pub(crate) fn insert_header(
    map: &mut HeaderMap,
    name: &str,
    value: &str,
) -> Result<(), TransportError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| TransportError::invalid_header(name))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| TransportError::invalid_header(name))?;
    map.insert(header_name, header_value);
    Ok(())
}

//! Profile cascade: fold inherited config and devices into an effective view.
//!
//! Sources are applied lowest priority first; the record's own values are
//! applied last and always win. A later source never removes a key, and a
//! device is replaced as a whole, never merged property by property.

use std::collections::BTreeMap;

use crate::cluster::references::{Config, Devices};

/// Effective config: every profile in order, then `own`.
pub fn expand_config<'a>(own: &Config, profiles: impl IntoIterator<Item = &'a Config>) -> Config {
    overlay(own, profiles)
}

/// Effective devices: every profile in order, then `own`. A device name seen
/// again replaces the earlier definition wholesale.
pub fn expand_devices<'a>(
    own: &Devices,
    profiles: impl IntoIterator<Item = &'a Devices>,
) -> Devices {
    overlay(own, profiles)
}

fn overlay<'a, V: Clone + 'a>(
    own: &BTreeMap<String, V>,
    sources: impl IntoIterator<Item = &'a BTreeMap<String, V>>,
) -> BTreeMap<String, V> {
    let mut expanded = BTreeMap::new();
    for source in sources {
        expanded.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    expanded.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    expanded
}

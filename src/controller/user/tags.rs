use std::collections::BTreeMap;

/// Whether the observed tags have to be overwritten with the desired ones.
///
/// Observed tags that are not desired are only cleared when no tags are desired at all.
#[must_use]
pub fn tags_need_update(
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> bool {
    if desired.is_empty() {
        return !observed.is_empty();
    }
    desired
        .iter()
        .any(|(key, value)| observed.get(key) != Some(value))
}

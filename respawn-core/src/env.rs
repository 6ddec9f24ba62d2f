use std::collections::{HashMap, HashSet};

/// Environment handed to the child: every ambient variable not hidden, then
/// every override on top.
pub fn merge_env<I, K, V>(
    ambient: I,
    overrides: &HashMap<String, String>,
    hidden: &HashSet<String>,
) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut merged: HashMap<String, String> = ambient
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(k, _)| !hidden.contains(k))
        .collect();

    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }

    merged
}

/// Variables of the supervisor's own process. Entries that are not valid
/// unicode are skipped.
pub fn ambient_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

use super::{BreadCrumb, ConfigMap, ConfigNode, ConfigSequence, DeltaHints, NoHints};

/// Diffs `from` against `to` with no domain hints.
pub fn create_delta(from: &ConfigNode, to: &ConfigNode) -> ConfigNode {
    create_delta_with(from, to, &NoHints)
}

/// Returns a delta that turns `from` into `to` when passed to [`apply_delta`].
/// Equal inputs produce `Noop`.
pub fn create_delta_with(from: &ConfigNode, to: &ConfigNode, hints: &dyn DeltaHints) -> ConfigNode {
    delta_at(from, to, &BreadCrumb::root(), hints)
}

pub fn apply_delta(target: &mut ConfigNode, delta: &ConfigNode) {
    match delta {
        ConfigNode::Noop => {}
        ConfigNode::Del => *target = ConfigNode::Undefined,
        ConfigNode::DeltaMap(entries) => {
            let map = target.ensure_map();
            for (key, entry) in entries {
                match entry {
                    ConfigNode::Noop => {}
                    ConfigNode::Del => {
                        map.remove(key);
                    }
                    _ => apply_delta(map.entry(key.clone()).or_default(), entry),
                }
            }
        }
        ConfigNode::DeltaSequence(entries) => {
            let from = match std::mem::take(target) {
                ConfigNode::Sequence(seq) => seq,
                _ => ConfigSequence::new(),
            };
            *target = ConfigNode::Sequence(apply_sequence_delta(&from, entries));
        }
        ConfigNode::Idx { .. } => {}
        value => *target = value.clone(),
    }
}

pub fn with_delta(from: &ConfigNode, delta: &ConfigNode) -> ConfigNode {
    let mut result = from.clone();
    apply_delta(&mut result, delta);
    result
}

/// Replaces any delta-only tags left in a tree with their snapshot equivalents.
pub fn decay_delta_artifacts(node: &mut ConfigNode) {
    match node {
        ConfigNode::DeltaMap(map) | ConfigNode::Map(map) => {
            let mut map = std::mem::take(map);
            map.retain(|_, value| !matches!(value, ConfigNode::Del | ConfigNode::Noop));
            for value in map.values_mut() {
                decay_delta_artifacts(value);
            }
            *node = ConfigNode::Map(map);
        }
        ConfigNode::DeltaSequence(seq) | ConfigNode::Sequence(seq) => {
            let mut seq = std::mem::take(seq);
            seq.retain(|value| {
                !matches!(
                    value,
                    ConfigNode::Del | ConfigNode::Noop | ConfigNode::Idx { .. }
                )
            });
            for value in seq.iter_mut() {
                decay_delta_artifacts(value);
            }
            *node = ConfigNode::Sequence(seq);
        }
        ConfigNode::Noop | ConfigNode::Del | ConfigNode::Idx { .. } => {
            *node = ConfigNode::Undefined;
        }
        _ => {}
    }
}

fn delta_at(
    from: &ConfigNode,
    to: &ConfigNode,
    crumb: &BreadCrumb<'_>,
    hints: &dyn DeltaHints,
) -> ConfigNode {
    if hints.should_bypass(crumb) {
        return to.clone();
    }
    if is_equivalent(from, to, crumb, hints) {
        return ConfigNode::Noop;
    }

    match (from, to) {
        (ConfigNode::Map(from), ConfigNode::Map(to)) => map_delta(from, to, crumb, hints),
        (ConfigNode::Sequence(from), ConfigNode::Sequence(to)) => {
            sequence_delta(from, to, crumb, hints)
        }
        _ => to.clone(),
    }
}

fn is_equivalent(
    a: &ConfigNode,
    b: &ConfigNode,
    crumb: &BreadCrumb<'_>,
    hints: &dyn DeltaHints,
) -> bool {
    if a.is_null_or_empty() && b.is_null_or_empty() && hints.are_null_and_empty_equivalent(crumb) {
        return true;
    }

    match (a, b) {
        (ConfigNode::Sequence(x), ConfigNode::Sequence(y))
            if !hints.does_sequence_order_matter(crumb) =>
        {
            if x.len() != y.len() {
                return false;
            }
            let mut used = vec![false; y.len()];
            x.iter().all(|item| {
                let found = y
                    .iter()
                    .enumerate()
                    .position(|(i, other)| !used[i] && other == item);
                match found {
                    Some(i) => {
                        used[i] = true;
                        true
                    }
                    None => false,
                }
            })
        }
        _ => a == b,
    }
}

fn map_delta(
    from: &ConfigMap,
    to: &ConfigMap,
    crumb: &BreadCrumb<'_>,
    hints: &dyn DeltaHints,
) -> ConfigNode {
    let mut result = ConfigMap::new();

    for (key, to_value) in to {
        let child = crumb.key(key);
        match from.get(key) {
            Some(from_value) => {
                let delta = delta_at(from_value, to_value, &child, hints);
                if !delta.is_noop() {
                    result.insert(key.clone(), delta);
                }
            }
            None => {
                if to_value.is_null_or_empty() && hints.are_null_and_empty_equivalent(&child) {
                    continue;
                }
                result.insert(key.clone(), to_value.clone());
            }
        }
    }

    if hints.can_delete_any_key() {
        for (key, from_value) in from {
            if to.contains_key(key) {
                continue;
            }
            let child = crumb.key(key);
            if !hints.can_delete_key(key, &child) {
                continue;
            }
            if from_value.is_null_or_empty() && hints.are_null_and_empty_equivalent(&child) {
                continue;
            }
            result.insert(key.clone(), ConfigNode::Del);
        }
    }

    if result.is_empty() {
        ConfigNode::Noop
    } else {
        ConfigNode::DeltaMap(result)
    }
}

fn sequence_delta(
    from: &[ConfigNode],
    to: &[ConfigNode],
    crumb: &BreadCrumb<'_>,
    hints: &dyn DeltaHints,
) -> ConfigNode {
    let mut entries = ConfigSequence::new();

    for (i, to_value) in to.iter().enumerate() {
        let child = crumb.index(i);
        let matched = hints
            .sequence_match(&child, from, to_value, i)
            .filter(|&j| j < from.len())
            .or_else(|| (i < from.len()).then_some(i));

        let Some(j) = matched else {
            entries.push(to_value.clone());
            continue;
        };

        let delta = delta_at(&from[j], to_value, &child, hints);
        match delta {
            ConfigNode::Noop => push_copy(&mut entries, j as u32),
            ConfigNode::DeltaMap(_) | ConfigNode::DeltaSequence(_) => {
                entries.push(ConfigNode::Idx {
                    start: j as u32,
                    len: 0,
                });
                entries.push(delta);
            }
            _ => entries.push(to_value.clone()),
        }
    }

    ConfigNode::DeltaSequence(entries)
}

fn push_copy(entries: &mut ConfigSequence, index: u32) {
    if let Some(ConfigNode::Idx { start, len }) = entries.last_mut() {
        if *len > 0 && *start + *len == index {
            *len += 1;
            return;
        }
    }
    entries.push(ConfigNode::Idx {
        start: index,
        len: 1,
    });
}

fn apply_sequence_delta(from: &[ConfigNode], entries: &[ConfigNode]) -> ConfigSequence {
    let mut result = ConfigSequence::with_capacity(entries.len());
    let mut iter = entries.iter();

    while let Some(entry) = iter.next() {
        match entry {
            ConfigNode::Idx { start, len: 0 } => {
                let mut value = from.get(*start as usize).cloned().unwrap_or_default();
                if let Some(patch) = iter.next() {
                    apply_delta(&mut value, patch);
                }
                result.push(value);
            }
            ConfigNode::Idx { start, len } => {
                let start = *start as usize;
                let end = (start + *len as usize).min(from.len());
                if start < end {
                    result.extend_from_slice(&from[start..end]);
                }
            }
            ConfigNode::Noop | ConfigNode::Del => {}
            value => {
                let mut item = ConfigNode::Undefined;
                apply_delta(&mut item, value);
                result.push(item);
            }
        }
    }

    result
}

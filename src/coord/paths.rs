// src/coord/paths.rs

//! Helpers for the `<name>.<sequence>` node-name convention used by
//! ephemeral-sequential candidates and lock children.

/// Width of the decimal sequence suffix appended by the coordination
/// service.
pub const SEQUENCE_WIDTH: usize = 10;

/// Splits a child name into its name part and sequence number, splitting
/// at the last `.`. Returns `None` for names that do not carry a decimal
/// sequence suffix.
pub fn split_node_name(child: &str) -> Option<(&str, u64)> {
    let (name, sequence) = child.rsplit_once('.')?;
    let sequence = sequence.parse::<u64>().ok()?;
    Some((name, sequence))
}

/// The name part of a sequential child, if well-formed.
pub fn name_part(child: &str) -> Option<&str> {
    split_node_name(child).map(|(name, _)| name)
}

/// Sorts children ascending by their sequence suffix, discarding entries
/// that do not follow the `<name>.<sequence>` convention.
pub fn sort_by_sequence(children: &mut Vec<String>) {
    children.retain(|child| split_node_name(child).is_some());
    children.sort_by_key(|child| {
        split_node_name(child)
            .map(|(_, sequence)| sequence)
            .unwrap_or(u64::MAX)
    });
}

/// Joins a root path and a child name.
pub fn join(root: &str, child: &str) -> String {
    let root = root.strip_suffix('/').unwrap_or(root);
    format!("{root}/{child}")
}

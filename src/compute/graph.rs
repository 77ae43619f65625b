//! Directed-graph helpers over connection keys.

use std::collections::{BTreeMap, BTreeSet};

use super::genome::{ConnectionKey, NodeKey};

/// Whether adding `test` to `connections` would close a cycle.
///
/// Every listed connection counts, so callers pass disabled connections too:
/// re-enabling one later must never introduce a cycle.
pub fn creates_cycle(connections: &[ConnectionKey], test: ConnectionKey) -> bool {
    let (input, output) = test;
    if input == output {
        return true;
    }

    let mut visited = BTreeSet::from([output]);
    loop {
        let mut added = 0;
        for &(a, b) in connections {
            if visited.contains(&a) && !visited.contains(&b) {
                if b == input {
                    return true;
                }
                visited.insert(b);
                added += 1;
            }
        }
        if added == 0 {
            return false;
        }
    }
}

/// Nodes whose value can influence an output.
///
/// A non-input node is required when it is an output, or when it lies on a
/// path from some input to some output. Inputs are never part of the result.
pub fn required_for_output(
    inputs: &[NodeKey],
    outputs: &[NodeKey],
    connections: &[ConnectionKey],
) -> BTreeSet<NodeKey> {
    let mut forward: BTreeMap<NodeKey, Vec<NodeKey>> = BTreeMap::new();
    let mut backward: BTreeMap<NodeKey, Vec<NodeKey>> = BTreeMap::new();
    for &(a, b) in connections {
        forward.entry(a).or_default().push(b);
        backward.entry(b).or_default().push(a);
    }

    let from_inputs = reachable(inputs, &forward);
    let to_outputs = reachable(outputs, &backward);

    let mut required: BTreeSet<NodeKey> = from_inputs
        .intersection(&to_outputs)
        .copied()
        .filter(|k| !inputs.contains(k))
        .collect();
    required.extend(outputs.iter().copied());
    required
}

fn reachable(start: &[NodeKey], edges: &BTreeMap<NodeKey, Vec<NodeKey>>) -> BTreeSet<NodeKey> {
    let mut seen: BTreeSet<NodeKey> = start.iter().copied().collect();
    let mut stack: Vec<NodeKey> = start.to_vec();
    while let Some(node) = stack.pop() {
        if let Some(next) = edges.get(&node) {
            for &n in next {
                if seen.insert(n) {
                    stack.push(n);
                }
            }
        }
    }
    seen
}

/// Topological evaluation order of `required` nodes.
///
/// Only connections whose source is an input or a required node are
/// considered. On a cycle, returns the nodes that could not be ordered.
pub fn feed_forward_order(
    inputs: &[NodeKey],
    required: &BTreeSet<NodeKey>,
    connections: &[ConnectionKey],
) -> Result<Vec<NodeKey>, Vec<NodeKey>> {
    let mut pending: BTreeMap<NodeKey, usize> = required.iter().map(|&k| (k, 0)).collect();
    let mut successors: BTreeMap<NodeKey, Vec<NodeKey>> = BTreeMap::new();

    for &(a, b) in connections {
        if !required.contains(&b) {
            continue;
        }
        if required.contains(&a) {
            *pending.entry(b).or_default() += 1;
            successors.entry(a).or_default().push(b);
        } else if !inputs.contains(&a) {
            // Source cannot influence anything; its contribution is dropped.
            continue;
        }
    }

    let mut ready: BTreeSet<NodeKey> = pending
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&k, _)| k)
        .collect();
    let mut order = Vec::with_capacity(required.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        if let Some(next) = successors.get(&node) {
            for n in next {
                if let Some(count) = pending.get_mut(n) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*n);
                    }
                }
            }
        }
    }

    if order.len() == required.len() {
        Ok(order)
    } else {
        let placed: BTreeSet<NodeKey> = order.iter().copied().collect();
        Err(required.difference(&placed).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_cycle() {
        let connections = [(-1, 2), (2, 3), (3, 0)];
        assert!(creates_cycle(&connections, (3, 2)));
        assert!(creates_cycle(&connections, (0, 2)));
        assert!(creates_cycle(&connections, (2, 2)));
        assert!(!creates_cycle(&connections, (-1, 3)));
        assert!(!creates_cycle(&connections, (2, 0)));
    }

    #[test]
    fn test_required_skips_dead_ends() {
        // 5 is fed by an input but leads nowhere; 6 feeds the output but
        // nothing reaches it.
        let connections = [(-1, 2), (2, 0), (-2, 5), (6, 0), (-1, 1)];
        let required = required_for_output(&[-1, -2], &[0, 1], &connections);
        assert_eq!(required, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_feed_forward_order() {
        let connections = [(-1, 3), (3, 2), (2, 0), (-1, 0)];
        let required = required_for_output(&[-1], &[0], &connections);
        let order = feed_forward_order(&[-1], &required, &connections).unwrap();
        assert_eq!(order, vec![3, 2, 0]);
    }

    #[test]
    fn test_feed_forward_order_detects_cycle() {
        let connections = [(-1, 2), (2, 3), (3, 2), (3, 0)];
        let required = BTreeSet::from([0, 2, 3]);
        let unplaced = feed_forward_order(&[-1], &required, &connections).unwrap_err();
        assert_eq!(unplaced, vec![0, 2, 3]);
    }
}

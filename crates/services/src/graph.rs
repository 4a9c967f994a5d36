//! Dependency graph queries over `name -> [dependency]` adjacency.

use std::collections::{BTreeSet, HashMap, VecDeque};

/// Every service whose dependency chain includes `name`, directly or
/// indirectly.
///
/// Traverses reverse edges with a visited set, so cycles terminate. A
/// service that reaches itself through a cycle is included exactly once.
/// The result is sorted for deterministic iteration.
pub fn find_all_dependents(edges: &HashMap<String, Vec<String>>, name: &str) -> Vec<String> {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for (service, deps) in edges {
        for dep in deps {
            reverse.entry(dep.as_str()).or_default().push(service.as_str());
        }
    }

    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([name]);
    while let Some(current) = queue.pop_front() {
        if let Some(dependents) = reverse.get(current) {
            for dependent in dependents {
                if visited.insert((*dependent).to_owned()) {
                    queue.push_back(dependent);
                }
            }
        }
    }
    visited.into_iter().collect()
}

/// Order `subset` so each service comes after those of its dependencies
/// that are also in `subset`. Members of a cycle cannot be ordered; they
/// are appended at the end in name order.
pub fn dependency_order(edges: &HashMap<String, Vec<String>>, subset: &[String]) -> Vec<String> {
    let members: BTreeSet<&str> = subset.iter().map(String::as_str).collect();
    let mut pending: HashMap<&str, usize> = members
        .iter()
        .map(|m| {
            let n = edges
                .get(*m)
                .map(|deps| deps.iter().filter(|d| members.contains(d.as_str())).count())
                .unwrap_or(0);
            (*m, n)
        })
        .collect();

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(m, _)| *m)
        .collect();
    let mut order = Vec::with_capacity(members.len());

    while let Some(next) = ready.pop_first() {
        pending.remove(next);
        order.push(next.to_owned());
        for m in &members {
            let Some(count) = pending.get_mut(m) else { continue };
            let depends_on_next = edges
                .get(*m)
                .map_or(false, |deps| deps.iter().any(|d| d == next));
            if depends_on_next {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*m);
                }
            }
        }
    }

    let mut stuck: Vec<&str> = pending.into_keys().collect();
    stuck.sort_unstable();
    order.extend(stuck.into_iter().map(str::to_owned));
    order
}

/// Find a dependency cycle that passes through `name`, if one exists.
/// Returns the path `name -> ... -> name`.
pub fn cycle_through(edges: &HashMap<String, Vec<String>>, name: &str) -> Option<Vec<String>> {
    fn walk(
        edges: &HashMap<String, Vec<String>>,
        target: &str,
        current: &str,
        path: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
    ) -> bool {
        for dep in edges.get(current).into_iter().flatten() {
            if dep == target {
                path.push(dep.clone());
                return true;
            }
            if seen.insert(dep.clone()) {
                path.push(dep.clone());
                if walk(edges, target, dep, path, seen) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    let mut path = vec![name.to_owned()];
    let mut seen = BTreeSet::new();
    walk(edges, name, name, &mut path, &mut seen).then_some(path)
}

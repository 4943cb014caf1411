use crate::compiler::Schema;
use std::collections::{BTreeMap, BTreeSet};

/// Order in which model tables are populated: every table after the tables
/// its foreign keys point at. Ties go to the alphabetically first model.
///
/// Self-references never block a table. Any remaining cycle is broken by
/// taking the first model by name that lies on a cycle; its references into
/// the cycle are verified once everything is loaded.
pub fn load_order(schema: &Schema) -> Vec<String> {
    let mut waiting_on: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for table in schema.tables() {
        let deps: BTreeSet<&str> = table
            .dependencies()
            .filter(|d| schema.table(d).is_some())
            .collect();
        for dep in &deps {
            dependents.entry(*dep).or_default().insert(&table.name);
        }
        waiting_on.insert(&table.name, deps);
    }

    let mut ready: BTreeSet<&str> = waiting_on
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(waiting_on.len());

    while !waiting_on.is_empty() {
        let next = match ready.pop_first() {
            Some(name) => name,
            None => {
                // Every waiting model sits on a cycle or depends on one.
                let name = waiting_on
                    .keys()
                    .copied()
                    .find(|name| on_cycle(&waiting_on, name))
                    .or_else(|| waiting_on.keys().next().copied())
                    .unwrap_or_default();
                let deps: Vec<&str> = waiting_on
                    .get(name)
                    .map(|d| d.iter().copied().collect())
                    .unwrap_or_default();
                log::warn!(
                    "Foreign-key cycle between {} and {}; loading {} first",
                    name,
                    deps.join(", "),
                    name
                );
                name
            }
        };

        waiting_on.remove(next);
        order.push(next.to_string());

        if let Some(children) = dependents.get(next) {
            for child in children {
                if let Some(deps) = waiting_on.get_mut(child) {
                    deps.remove(next);
                    if deps.is_empty() {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    order
}

/// Whether `start` can reach itself through the dependencies of models
/// that are still waiting.
fn on_cycle(waiting_on: &BTreeMap<&str, BTreeSet<&str>>, start: &str) -> bool {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = waiting_on
        .get(start)
        .map(|d| d.iter().copied().collect())
        .unwrap_or_default();
    while let Some(name) = stack.pop() {
        if name == start {
            return true;
        }
        if !seen.insert(name) {
            continue;
        }
        if let Some(deps) = waiting_on.get(name) {
            stack.extend(deps.iter().copied());
        }
    }
    false
}

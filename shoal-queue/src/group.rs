//! Scheduling groups and the rebuildable group table

use std::collections::HashMap;

use crate::config::{
    GroupOptions, QueueOptions, Strategy, DEFAULT_GROUP, LEECHERS_GROUP, PRIVILEGED_GROUP,
};

/// A scheduling class with live slot accounting
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub name: String,
    /// Lower values schedule earlier; 0 belongs to the privileged group
    pub priority: u32,
    /// Maximum concurrently active uploads pinned to this group
    pub slots: usize,
    pub strategy: Strategy,
    /// Active uploads currently pinned to this group
    pub used_slots: usize,
}

/// Group table plus the global concurrency cap.
///
/// Rebuilt wholesale on reconfiguration; slot accounting survives for every
/// group whose name does. A group that disappears takes its accounting with
/// it: in-flight uploads pinned to it still run to completion, but their
/// slots were already reclaimed by the rebuild.
#[derive(Debug)]
pub(crate) struct GroupTable {
    groups: HashMap<String, Group>,
    max_slots: usize,
}

impl GroupTable {
    /// Assemble a table from options, carrying `used_slots` from `previous`
    /// for surviving group names. The privileged group is synthesized with
    /// priority 0, FIFO ordering, and every global slot.
    pub fn build(options: &QueueOptions, previous: Option<&GroupTable>) -> Self {
        let mut groups = HashMap::with_capacity(options.user_defined.len() + 3);
        groups.insert(
            PRIVILEGED_GROUP.to_string(),
            Group {
                name: PRIVILEGED_GROUP.to_string(),
                priority: 0,
                slots: options.slots,
                strategy: Strategy::FirstInFirstOut,
                used_slots: Self::carried(previous, PRIVILEGED_GROUP),
            },
        );

        let mut defined: Vec<(&str, &GroupOptions)> = vec![
            (DEFAULT_GROUP, &options.default),
            (LEECHERS_GROUP, &options.leechers),
        ];
        defined.extend(
            options
                .user_defined
                .iter()
                .map(|(name, opts)| (name.as_str(), opts)),
        );
        for (name, opts) in defined {
            groups.insert(
                name.to_string(),
                Group {
                    name: name.to_string(),
                    priority: opts.priority,
                    slots: opts.slots,
                    strategy: opts.strategy,
                    used_slots: Self::carried(previous, name),
                },
            );
        }

        Self {
            groups,
            max_slots: options.slots,
        }
    }

    fn carried(previous: Option<&GroupTable>, name: &str) -> usize {
        previous
            .and_then(|table| table.groups.get(name))
            .map(|group| group.used_slots)
            .unwrap_or(0)
    }

    /// Global concurrent upload cap
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// Total active uploads across all groups
    pub fn total_used(&self) -> usize {
        self.groups.values().map(|group| group.used_slots).sum()
    }

    /// Groups in scheduling order: ascending priority, ties broken by name
    pub fn ordered(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.name.cmp(&b.name))
        });
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_with(slots: usize, user_defined: &[(&str, u32, usize)]) -> QueueOptions {
        let mut options = QueueOptions {
            slots,
            ..QueueOptions::default()
        };
        for (name, priority, group_slots) in user_defined {
            options.user_defined.insert(
                name.to_string(),
                GroupOptions {
                    priority: *priority,
                    slots: *group_slots,
                    strategy: Strategy::FirstInFirstOut,
                },
            );
        }
        options
    }

    #[test]
    fn test_build_synthesizes_privileged_group() {
        let table = GroupTable::build(&options_with(8, &[]), None);
        let privileged = table.get(PRIVILEGED_GROUP).unwrap();
        assert_eq!(privileged.priority, 0);
        assert_eq!(privileged.slots, 8);
        assert_eq!(privileged.strategy, Strategy::FirstInFirstOut);
        assert_eq!(privileged.used_slots, 0);
        assert!(table.contains(DEFAULT_GROUP));
        assert!(table.contains(LEECHERS_GROUP));
    }

    #[test]
    fn test_rebuild_carries_used_slots_for_surviving_names() {
        let mut table = GroupTable::build(&options_with(4, &[("friends", 3, 2)]), None);
        table.get_mut(DEFAULT_GROUP).unwrap().used_slots = 2;
        table.get_mut("friends").unwrap().used_slots = 1;

        let rebuilt = GroupTable::build(&options_with(6, &[("friends", 5, 4)]), Some(&table));
        assert_eq!(rebuilt.get(DEFAULT_GROUP).unwrap().used_slots, 2);
        assert_eq!(rebuilt.get("friends").unwrap().used_slots, 1);
        assert_eq!(rebuilt.get("friends").unwrap().priority, 5);
        assert_eq!(rebuilt.max_slots(), 6);
    }

    #[test]
    fn test_rebuild_drops_accounting_with_the_group() {
        let mut table = GroupTable::build(&options_with(4, &[("experimental", 3, 2)]), None);
        table.get_mut("experimental").unwrap().used_slots = 2;

        let rebuilt = GroupTable::build(&options_with(4, &[]), Some(&table));
        assert!(!rebuilt.contains("experimental"));
        assert_eq!(rebuilt.total_used(), 0);
    }

    #[test]
    fn test_ordered_walks_priority_then_name() {
        let table = GroupTable::build(
            &options_with(4, &[("bulk", 2, 1), ("archive", 2, 1), ("vip", 1, 2)]),
            None,
        );
        let names: Vec<&str> = table
            .ordered()
            .iter()
            .map(|group| group.name.as_str())
            .collect();
        // default and vip share priority 1; archive, bulk, and leechers
        // share priority 2.
        assert_eq!(
            names,
            vec![
                PRIVILEGED_GROUP,
                DEFAULT_GROUP,
                "vip",
                "archive",
                "bulk",
                LEECHERS_GROUP
            ]
        );
    }

    #[test]
    fn test_total_used_sums_all_groups() {
        let mut table = GroupTable::build(&options_with(10, &[("friends", 3, 2)]), None);
        assert_eq!(table.total_used(), 0);
        table.get_mut(PRIVILEGED_GROUP).unwrap().used_slots = 1;
        table.get_mut(DEFAULT_GROUP).unwrap().used_slots = 2;
        table.get_mut("friends").unwrap().used_slots = 1;
        assert_eq!(table.total_used(), 4);
    }
}

use proptest::collection::{hash_set, vec};
use proptest::prelude::*;
use rookery::cluster::allocator::{HashRingAllocator, ModuloAllocator, NodeAllocator};

proptest! {
    /// Modulo routing always returns the member whose slot equals
    /// `key % max_working_nodes`, or nobody when that slot is unclaimed.
    #[test]
    fn modulo_routes_by_remainder(
        max in 1usize..16,
        claimed in vec(any::<bool>(), 16),
        keys in vec(any::<u64>(), 0..64),
    ) {
        let mut allocator = ModuloAllocator::new(max);
        let mut owners = vec![None; max];
        for slot in 0..max {
            if claimed[slot] {
                let name = format!("node-{slot}");
                allocator.add_node(&name, Some(slot)).unwrap();
                owners[slot] = Some(name);
            }
        }

        for key in keys {
            let slot = (key % max as u64) as usize;
            prop_assert_eq!(allocator.node_for_key(&key.into()), owners[slot].clone());
        }
    }

    /// Claimed slots are always pairwise distinct: claiming an already
    /// claimed slot is rejected, whatever order the claims arrive in.
    #[test]
    fn modulo_rejects_colliding_claims(
        max in 1usize..8,
        slots in vec(0usize..8, 1..16),
    ) {
        let mut allocator = ModuloAllocator::new(max);
        let mut seen = vec![false; max];
        for (i, slot) in slots.into_iter().enumerate() {
            let name = format!("node-{i}");
            let result = allocator.add_node(&name, Some(slot));
            if slot >= max || seen[slot] {
                prop_assert!(result.is_err());
            } else {
                prop_assert!(result.is_ok());
                seen[slot] = true;
            }
        }
    }

    /// Adding a member to the ring only reassigns keys onto the new
    /// member; every other key keeps its mapping.
    #[test]
    fn ring_addition_is_monotonic(
        names in hash_set("[a-z]{1,8}", 1..8),
        newcomer in "[A-Z]{1,8}",
        keys in vec("[a-z0-9-]{1,16}", 0..64),
    ) {
        let mut allocator = HashRingAllocator::new();
        for name in &names {
            allocator.add_node(name, None).unwrap();
        }

        let before: Vec<_> = keys
            .iter()
            .map(|k| allocator.node_for_key(&k.as_str().into()).unwrap())
            .collect();

        allocator.add_node(&newcomer, None).unwrap();

        for (key, old) in keys.iter().zip(before) {
            let new = allocator.node_for_key(&key.as_str().into()).unwrap();
            prop_assert!(new == old || new == newcomer);
        }
    }

    /// Removing a member only reassigns the keys it owned.
    #[test]
    fn ring_removal_is_monotonic(
        names in hash_set("[a-z]{1,8}", 2..8),
        keys in vec("[a-z0-9-]{1,16}", 0..64),
    ) {
        let mut allocator = HashRingAllocator::new();
        for name in &names {
            allocator.add_node(name, None).unwrap();
        }
        let departing = names.iter().next().unwrap().clone();

        let before: Vec<_> = keys
            .iter()
            .map(|k| allocator.node_for_key(&k.as_str().into()).unwrap())
            .collect();

        allocator.remove_node(&departing);

        for (key, old) in keys.iter().zip(before) {
            let new = allocator.node_for_key(&key.as_str().into()).unwrap();
            if old != departing {
                prop_assert_eq!(new, old);
            } else {
                prop_assert_ne!(new, departing.clone());
            }
        }
    }
}

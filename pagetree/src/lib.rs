#![cfg_attr(test, allow(clippy::disallowed_methods))]
// unwrap() is denied workspace-wide to prevent panics from corrupt pages.
// Test code is allowed to use it for convenience.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Life of a write:
// 1. Open the write transaction (waits for the single write slot)
// 2. Each tree operation reads the root-to-leaf path, changes the leaf,
//    and writes the path back bottom-up, splitting or rebalancing as needed
// 3. Touched pages are copied into the transaction's private overlay
// 4. Commit writes the overlay and the free list, then flips the superblock
//
// Life of a read:
// 1. Open a read transaction, pinning the latest commit
// 2. Descend from that commit's roots; pages it references are never reused
//    while the transaction is open
//
// System components:
//  - Page store (file or memory)
//  - Page allocator with deferred reclamation
//  - Copy-on-write B-trees with overflow runs for large values
//  - Root catalog mapping tree names to tree states

pub mod config;
mod e2e_tests;
pub mod storage;
pub mod testing;

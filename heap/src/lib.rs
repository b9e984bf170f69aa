mod heap;

pub use heap::{GcStats, Heap, HeapSettings, RootProvider};

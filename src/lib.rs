pub mod core;
pub mod cache;
pub mod column;
pub mod compression;
pub mod memory;
pub mod mmap;
pub mod storage;
pub mod table;

/*
┌────────────────────────────────────────────────────────────────────────────────────────────┐
│                             FRAGSTORE STRUCT ARCHITECTURE                                   │
└────────────────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────────── TABLE LAYER ─────────────────────────────────────────┐
│                                                                                              │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                                  struct Table                                       │    │
│  │  ┌──────────────────────────────────────────────────────────────────────────────┐ │    │
│  │  │ ctx: Arc<StoreContext>            // Injected collaborators                  │ │    │
│  │  │ specs: RwLock<Vec<ColumnSpec>>    // Creators for future fragments           │ │    │
│  │  │ header: RwLock<Vec<Value>>        // Row 0, the only mutable row             │ │    │
│  │  │ state: Mutex<TableState>          // fragments, completed, disposed          │ │    │
│  │  │ more_rows: Condvar                // Wakes readers blocked in more_rows()    │ │    │
│  │  │ producer: Mutex<Producer>         // Open fragment, notify/backpressure      │ │    │
│  │  │ rows: AtomicUsize                 // Published row count                     │ │    │
│  │  │ metadata: RwLock<MetadataMap>     // (row class, column label) -> CellMeta   │ │    │
│  │  └──────────────────────────────────────────────────────────────────────────────┘ │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
│                                          │ 1..n                                              │
│                                          ▼                                                   │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐    │
│  │                        struct Fragment  (8192 rows, impl Swappable)                 │    │
│  │ • columns: RwLock<Vec<(ColumnSpec, Column)>>                                        │    │
│  │ • swap_files: Mutex<Vec<SwapFile>>   // private or shared (snapshot)               │    │
│  │ • completed / valid / disposed / last_access                                       │    │
│  └────────────────────────────────────────────────────────────────────────────────────┘    │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────────── COLUMN LAYER ────────────────────────────────────────┐
│                                                                                              │
│  enum Column                                   struct ColumnSlot<B: ColumnBuffer>            │
│  • Boolean   (tri-state byte)                  • RwLock<Resident(B) | Evicted | Disposed>   │
│  • Byte/Short/Int/Long  (null bitmap)          • extent: Option<SwapExtent>                  │
│  • Float/Double/Decimal (NaN sentinel)         • reload: signal monitor, then lock           │
│  • Timestamp (-1 millis)                                                                     │
│  • String    (length-prefixed, ValueCache)     struct BlobColumn (impl Swappable)           │
│  • Object    (ObjectCodec, dynamic retype)     • working set + private record file          │
│  • Blob      (Arc<BlobColumn>)                                                               │
└──────────────────────────────────────────────────────────────────────────────────────────────┘

┌───────────────────────────────────── STORAGE / MEMORY ──────────────────────────────────────┐
│                                                                                              │
│  swap file:  [col 0 payload][col 1 payload]...[dir 0][dir 1]...  dir = {u64, u32, u32} LE    │
│  snapshot:   fragment_000000.swap ... + manifest.json (specs, header, CRC32 per file)        │
│                                                                                              │
│  trait MemoryMonitor  (wait_for_memory, will_block_on_io, charge, release)                   │
│  trait Swappable      (is_swappable, swap_priority, swap, dispose)                           │
│  struct SwapScheduler (Weak<dyn Swappable> registry, run_once / spawn)                       │
│  struct TableCache    (LRU of Arc<Table>, dispose on last reference)                         │
└──────────────────────────────────────────────────────────────────────────────────────────────┘
*/

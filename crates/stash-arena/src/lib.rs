//! Per-slot arenas for the Stash transient object store.
//!
//! Objects created while processing a unit of work can be placed in the
//! [`Arena`] of the slot running it. Resetting the arena invalidates every
//! allocation at once; an [`ArenaRef`] taken before the reset resolves to
//! nothing afterwards. Storage is kept for reuse by the next unit of work.
//!
//! Each thread may designate one arena as current with
//! [`Arena::make_current`]; the designation lasts until the returned guard
//! is dropped.

pub mod arena;
pub mod header;

pub use arena::{current_arena, Arena, ArenaRef, ArenaReport, CurrentArenaGuard};
pub use header::ArenaHeader;

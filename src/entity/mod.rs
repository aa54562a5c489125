// ============================================================================
// Entity Model
// ============================================================================
//
// The DTO contract: state flag, keys, child collections, resolved
// references and property-change tracking.
//
// ============================================================================

pub mod dto;
pub mod state;

pub use dto::{Dto, PropertyChange};
pub use state::{DtoState, Operation};

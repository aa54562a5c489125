pub mod bag;
pub(crate) mod call;
pub mod session;

pub use bag::{BagValue, FORCE_REFRESH, PropertyBag, RETRIEVE_CHILDREN, SKIP_LIMIT};
pub(crate) use call::CallContext;
pub use session::{ClientKind, SessionContext};

//! Unidirectional state container.
//!
//! A `Store` owns one state value and advances it only through a `Reducer`.
//! Reducers may request asynchronous `Effect`s; every action an effect emits
//! re-enters the same store's dispatch loop: dispatch → reduce → start
//! effects → feed emissions back into dispatch.
//!
//! Larger reducers are built from smaller ones with `combine` and `pullback`.
//! Smaller stores are derived from larger ones with `Store::scope`, and
//! deduplicated read-only projections with `Store::view`.

pub mod config;
pub mod effect;
pub mod error;
pub mod observe;
pub mod reducer;
pub mod store;
pub mod view;

pub use config::StoreConfig;
pub use effect::{CancelId, Cancellable, Effect};
pub use error::{Result, StoreError};
pub use observe::{StateStream, Subscription};
pub use reducer::{combine, pullback, ActionPath, BoxReducer, Combine, Reducer};
pub use store::Store;
pub use view::ViewStore;

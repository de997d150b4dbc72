pub mod sync;
pub mod text;
pub mod time;

pub(crate) use sync::lock_unpoisoned;
pub use text::{normalize_symbol, normalize_symbols};
pub use time::{format_millis, millis_ago, now_millis};

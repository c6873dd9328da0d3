//! Validated core types.

mod record_id;
mod role;
mod server_url;

pub use record_id::{RecordId, RecordType};
pub use role::Role;
pub use server_url::ServerUrl;

pub mod encryption;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod sql_store;

pub use encryption::{CredentialVault, VaultError, VaultResult};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use sql_store::{PgAdminStore, PgLeaseStore, PgTenantStore, SqlStore};

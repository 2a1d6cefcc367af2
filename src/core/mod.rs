pub mod audit;
pub mod callback;
pub mod session;
pub mod storage;
pub mod tenant;
pub mod token;

pub use audit::{AuditEntry, AuditLog};
pub use callback::{CallbackDispatcher, CallbackEvent};
pub use session::{NewSession, Permission, Permissions, Session};
pub use storage::{Storage, StorageCapabilities, StorageProtocol};
pub use tenant::{EditorMode, Tenant};
pub use token::{TokenPayload, TokenService};

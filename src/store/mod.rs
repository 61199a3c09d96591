//! Persistence layer: typed records, migrations, and the libSQL backend.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    AgentConfiguration, AgentRecord, AgentTool, ConnectionStatus, DeviceToken, InboundMessage,
    InboundStatus, InviteCode, InviteStatus, JobStatus, MemoryContent, MemoryRecord, MemoryStatus,
    MemoryType, Metric, NotificationSettings, OAuthConnection, OAuthCredentials, OAuthProvider,
    OAuthProviderConfig, OrderStatus, PersonalizedSettings, PortraitData, UserJob, UserLocation,
    UserOrder, UserPortrait, UserProfile,
};
pub use traits::Database;

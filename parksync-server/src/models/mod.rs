pub mod command_queue;
pub mod dead_letter;
pub mod device_affinity;
pub mod display_command;
pub mod display_policy;
pub mod gateway;
pub mod rate_bucket;
pub mod verification;
pub mod verified_hash;

pub use command_queue::{CommandQueueTable, QueueEntry, QueueState};
pub use dead_letter::{DeadLetter, DeadLetterTable};
pub use device_affinity::{DeviceAffinity, DeviceAffinityTable};
pub use display_command::DisplayCommand;
pub use display_policy::{DisplayPolicy, DisplayPolicyRow, DisplayPolicyTable};
pub use gateway::{GatewayRecord, GatewayStatus};
pub use rate_bucket::{RateBucket, RateBucketTable};
pub use verification::{VerificationRecord, VerificationTable};
pub use verified_hash::{VerifiedHash, VerifiedHashTable};

pub trait Table {
    /// The name of the table
    fn name(&self) -> &'static str;

    /// The SQL statement to create the table
    fn create(&self) -> String;

    /// The SQL statement to dispose the table
    fn dispose(&self) -> String;

    /// The dependencies of the table
    fn dependencies(&self) -> Vec<&'static str>;
}

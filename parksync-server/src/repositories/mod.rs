mod command_queue;
mod dead_letter;
mod device_affinity;
mod display_policy;
mod rate_bucket;
mod verification;
mod verified_hash;

pub use command_queue::{CommandQueueRepository, EnqueueOutcome};
pub use dead_letter::DeadLetterRepository;
pub use device_affinity::DeviceAffinityRepository;
pub use display_policy::DisplayPolicyRepository;
pub use rate_bucket::RateBucketRepository;
pub use verification::VerificationRepository;
pub use verified_hash::VerifiedHashRepository;

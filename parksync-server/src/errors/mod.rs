pub mod dispatch;
pub mod policy;
pub mod queue;
pub mod verify;

pub use dispatch::DispatchError;
pub use policy::PolicyError;
pub use queue::QueueError;
pub use verify::VerifyError;

/// Umbrella error for the delivery pipeline.
///
/// Transient conditions (rate limit, offline gateway, a single verification
/// timeout) are recovered locally by the services and never escape a worker;
/// only terminal conditions are surfaced to operators through logs and
/// metrics. No per-command error may take down the process.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

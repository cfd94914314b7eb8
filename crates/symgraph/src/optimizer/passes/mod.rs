mod canonicalize;
mod dce;
mod device;
mod merge;

pub use canonicalize::{
    canonical_rules, CancelMulDiv, CanonicalizePass, ConstantFold, DoubleNegation,
    IdentityArithmetic, SubtractSelf,
};
pub use dce::DeadCodeEliminationPass;
pub use device::{
    DeviceSpecializationPass, FoldDeviceRoundTrip, FoldHostRoundTrip, SpecializeForDevice,
    TransferEliminationPass,
};
pub use merge::MergePass;

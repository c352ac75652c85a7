//! Package and revision API types, conditions and capability traits

pub mod condition;
pub mod interfaces;
pub mod types;

pub use condition::{
    Condition, ConditionStatus, TYPE_DEPENDENCIES_SATISFIED, TYPE_HEALTHY, find_condition,
    reasons, set_condition,
};
pub use interfaces::{
    Conditioned, Object, Package, PackageResource, PackageRevision, PackageRevisionList,
    RevisionResource, TlsSecretNames,
};
pub use types::*;

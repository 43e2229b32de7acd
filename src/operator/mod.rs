//! Operators
//!
//! Region moves and the controller that admits them. Schedulers build
//! [`Operator`]s; once submitted, the [`OperatorController`] owns them until
//! they finish, are cancelled or time out.

pub mod controller;
#[allow(clippy::module_inception)]
pub mod operator;

pub use controller::{Admission, ControllerLoad, OperatorController, RejectReason};
pub use operator::{Operator, OperatorId, OperatorKind, OperatorStatus, OperatorStep};

//! Domain models for the fee ledger and reconciliation service.

pub mod category;
pub mod ledger;
pub mod notification;
pub mod payment;
pub mod student;
pub mod subscription;
pub mod template;
pub mod upgrade;

pub use category::{CategoryMeta, ServiceKind};
pub use ledger::{Discount, DiscountType, FeeItem, FeeItemStatus, FeeLedger, Fine, LedgerStatus};
pub use notification::{NotificationEvent, NotificationKind, RelatedEntity};
pub use payment::{
    format_receipt_no, Allocation, GatewayRefs, Payment, PaymentMethod, PaymentMode,
    PaymentStatus, RefundInfo, VerificationInfo,
};
pub use student::{AcademicStatus, ServiceChanges, ServicesOpted, Student};
pub use subscription::{
    CancellationInfo, FailedAttempt, InstallmentRecord, PlanType, Subscription,
    SubscriptionStatus,
};
pub use template::{FeeTemplate, LedgerSeed, SeedItem, TemplateItem};
pub use upgrade::{RollbackInfo, SemesterUpgradeLog, UpgradeStatus};

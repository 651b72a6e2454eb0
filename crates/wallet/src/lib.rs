pub mod error;
pub mod notify;
pub mod service;
pub mod wallet;

pub use error::WalletError;
pub use notify::{NotificationSink, NullNotificationSink, ThresholdEvent};
pub use service::{Reservation, WalletService};
pub use wallet::{ResetPeriod, TransferRecord, Wallet, WalletKind, WalletReset};

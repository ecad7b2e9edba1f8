mod anomaly;
mod order;
mod payment;
mod refund;
mod subscription;
mod webhook_event;

pub use anomaly::*;
pub use order::*;
pub use payment::*;
pub use refund::*;
pub use subscription::*;
pub use webhook_event::*;

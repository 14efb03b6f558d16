pub mod booking;
pub mod discount;
pub mod order;
pub mod session;
pub mod ticket;
pub mod transaction;

pub use booking::{Booking, BookingStatus, GuestContact, PaymentStatus};
pub use discount::{Discount, DiscountKind, DiscountSpec};
pub use order::{BankTransferOrder, OrderStatus};
pub use session::{ClassInfo, Session, SessionContext};
pub use ticket::{
    CountOption, OwnedTicket, TicketCategory, TicketKind, TicketProduct, TicketStatus,
};
pub use transaction::{PaymentMethod, RevenueTransaction};

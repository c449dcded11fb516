//! Operator-side finance: quotes and their lifecycle, bookings with customer
//! payments, customer invoices, supplier payables, and agent commission ledgers.
//! Also the client register and inbound customer requests that feed quoting.

pub mod agents;
pub mod bookings;
pub mod clients;
pub mod payables;
pub mod quotes;
pub mod receivables;
pub mod requests;

pub use agents::{Agent, AgentLedger, AgentStatus, AgentTransaction, Commission, NewAgent, TransactionKind};
pub use bookings::{Booking, BookingBook, BookingStatus, NewBooking, NewPayment, Payment, PaymentKind};
pub use clients::{Client, ClientBook, ClientFilter, ClientSource, ClientSourceCounts, ClientUpdate, NewClient};
pub use payables::{
    NewSupplier, NewSupplierInvoice, NewSupplierPayment, PayablesFilter, PayablesLedger, Supplier,
    SupplierInvoice, SupplierInvoiceStatus, SupplierKind,
};
pub use quotes::{Customer, NewQuote, PublicQuote, Quote, QuoteBook, QuoteLifecycle, QuoteStatus};
pub use receivables::{
    BillTo, BillToKind, CustomerInvoice, InvoiceItem, InvoiceStatus, NewInvoice, NewInvoicePayment,
    ReceivablesLedger,
};
pub use requests::{CustomerRequest, NewCustomerRequest, RequestBook, RequestStats, RequestStatus};

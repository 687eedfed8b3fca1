//! Request and response DTOs for the JSON API.

mod allocation;
mod invoice;
mod payment;
mod receipt;
mod report;

pub use allocation::*;
pub use invoice::*;
pub use payment::*;
pub use receipt::*;
pub use report::*;
